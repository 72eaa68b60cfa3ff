//! Tensor operations.
//!
//! An [`Operation`] is one node of the compute graph. Placeholders carry only a
//! shape; computes carry an iteration space (spatial axes, then reduction axes)
//! and the accesses their body performs. The body arithmetic itself is not
//! modeled: scheduling only needs to know who reads whom and through which
//! indices.

use std::fmt;

use enumset::EnumSet;
use smallvec::SmallVec;

use crate::types::{AccessIndex, DType, MemScope, OpFlag};

/// A named loop dimension of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Axis {
    pub name: String,
    pub extent: i64,
}

impl Axis {
    pub fn new(name: impl Into<String>, extent: i64) -> Self {
        Self { name: name.into(), extent }
    }
}

/// A read of another tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Access {
    /// Name of the operation producing the tensor.
    pub tensor: String,
    /// One index per dimension of the tensor.
    pub indices: SmallVec<[AccessIndex; 4]>,
}

impl Access {
    pub fn new(tensor: impl Into<String>, indices: impl IntoIterator<Item = AccessIndex>) -> Self {
        Self { tensor: tensor.into(), indices: indices.into_iter().collect() }
    }

    /// Identity access `T[ax0, ax1, ..., axN]`.
    pub fn identity(tensor: impl Into<String>, ndim: usize) -> Self {
        Self::new(tensor, (0..ndim).map(AccessIndex::Axis))
    }

    pub fn is_identity(&self) -> bool {
        self.indices.iter().enumerate().all(|(i, idx)| *idx == AccessIndex::Axis(i))
    }

    pub fn is_simple(&self) -> bool {
        self.indices.iter().all(AccessIndex::is_simple)
    }

    /// Whether spatial axis `axis` of the reader appears in this access.
    pub fn uses_axis(&self, axis: usize) -> bool {
        self.indices.contains(&AccessIndex::Axis(axis))
    }
}

/// How an operation came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Graph input.
    Placeholder,
    /// User computation.
    Compute,
    /// Copy of `source` into a cache scope, inserted by a cache-read.
    CacheRead { source: String, scope: MemScope },
    /// Computation of `target` moved into a cache scope by a cache-write.
    CacheWrite { target: String, scope: MemScope },
    /// Partial reduction of `target`, one result per value of a factored
    /// reduction loop.
    Rfactor { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    /// Free-form classification used by sketch rules (e.g. `"sparse_dense_bsrmm"`).
    pub tag: String,
    pub kind: OpKind,
    pub dtype: DType,
    pub axes: Vec<Axis>,
    pub reduce_axes: Vec<Axis>,
    pub reads: Vec<Access>,
    pub flags: EnumSet<OpFlag>,
}

impl Operation {
    /// Graph input with dimensions named `i0, i1, ...`.
    pub fn placeholder(name: impl Into<String>, shape: &[i64], dtype: DType) -> Self {
        Self {
            name: name.into(),
            tag: String::new(),
            kind: OpKind::Placeholder,
            dtype,
            axes: shape.iter().enumerate().map(|(i, &extent)| Axis::new(format!("i{i}"), extent)).collect(),
            reduce_axes: Vec::new(),
            reads: Vec::new(),
            flags: EnumSet::empty(),
        }
    }

    /// Compute over the given spatial axes. Chain [`Self::reduce`] and
    /// [`Self::read`] to describe the body.
    pub fn compute<'a>(name: impl Into<String>, axes: impl IntoIterator<Item = (&'a str, i64)>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            tag: String::new(),
            kind: OpKind::Compute,
            dtype,
            axes: axes.into_iter().map(|(n, e)| Axis::new(n, e)).collect(),
            reduce_axes: Vec::new(),
            reads: Vec::new(),
            flags: EnumSet::empty(),
        }
    }

    pub fn reduce<'a>(mut self, axes: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        self.reduce_axes.extend(axes.into_iter().map(|(n, e)| Axis::new(n, e)));
        self
    }

    pub fn read(mut self, tensor: impl Into<String>, indices: impl IntoIterator<Item = AccessIndex>) -> Self {
        self.reads.push(Access::new(tensor, indices));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_flag(mut self, flag: OpFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, OpKind::Placeholder)
    }

    pub fn has_reduce(&self) -> bool {
        !self.reduce_axes.is_empty()
    }

    pub fn has_flag(&self, flag: OpFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn shape(&self) -> SmallVec<[i64; 4]> {
        self.axes.iter().map(|a| a.extent).collect()
    }

    /// Whether this operation reads `tensor` at all.
    pub fn reads_from(&self, tensor: &str) -> bool {
        self.reads.iter().any(|a| a.tensor == tensor)
    }

    /// Copy of `source` into `scope`, named `"{source}.{scope}"`.
    pub fn cache_read_of(source: &Operation, scope: MemScope) -> Self {
        Self {
            name: format!("{}.{scope}", source.name),
            tag: String::new(),
            kind: OpKind::CacheRead { source: source.name.clone(), scope },
            dtype: source.dtype,
            axes: source.axes.clone(),
            reduce_axes: Vec::new(),
            reads: vec![Access::identity(source.name.clone(), source.ndim())],
            flags: EnumSet::empty(),
        }
    }

    /// Split a compute into the cache stage that performs the computation in
    /// `scope` and the copy that writes it back under the original name.
    ///
    /// Returns `(cache, write_back)`.
    pub fn cache_write_of(target: &Operation, scope: MemScope) -> (Self, Self) {
        let cache = Self {
            name: format!("{}.{scope}", target.name),
            tag: target.tag.clone(),
            kind: OpKind::CacheWrite { target: target.name.clone(), scope },
            ..target.clone()
        };
        let write_back = Self {
            reduce_axes: Vec::new(),
            reads: vec![Access::identity(cache.name.clone(), target.ndim())],
            flags: target.flags,
            ..target.clone()
        };
        (cache, write_back)
    }

    /// Split the reduction of `target` in two: a partial stage
    /// `"{target}.rf"` that keeps `factor` as a spatial axis at position
    /// `factor_pos`, reduces over `remaining` and reads through `reads`, and
    /// the target rewritten to sum the partial results over `factor`.
    ///
    /// Returns `(partial, target)`.
    pub fn rfactor_of(
        target: &Operation,
        factor: Axis,
        factor_pos: usize,
        remaining: Vec<Axis>,
        reads: Vec<Access>,
    ) -> (Self, Self) {
        let mut axes = target.axes.clone();
        axes.insert(factor_pos.min(axes.len()), factor.clone());
        let partial = Self {
            name: format!("{}.rf", target.name),
            tag: target.tag.clone(),
            kind: OpKind::Rfactor { target: target.name.clone() },
            dtype: target.dtype,
            axes,
            reduce_axes: remaining,
            reads,
            flags: EnumSet::empty(),
        };
        let indices = (0..partial.ndim()).map(|d| match d.cmp(&factor_pos) {
            std::cmp::Ordering::Less => AccessIndex::Axis(d),
            std::cmp::Ordering::Equal => AccessIndex::Reduce(0),
            std::cmp::Ordering::Greater => AccessIndex::Axis(d - 1),
        });
        let rewritten =
            Self { reduce_axes: vec![factor], reads: vec![Access::new(partial.name.clone(), indices)], ..target.clone() };
        (partial, rewritten)
    }

    /// This operation with every read of `from` redirected to `to`.
    pub fn redirect_reads(&self, from: &str, to: &str) -> Self {
        let mut op = self.clone();
        for access in op.reads.iter_mut().filter(|a| a.tensor == from) {
            access.tensor = to.to_string();
        }
        op
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |axes: &[Axis]| axes.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ");
        if self.is_placeholder() {
            return write!(f, "{} = PLACEHOLDER {:?} {}", self.name, self.shape().as_slice(), self.dtype);
        }

        write!(f, "{}({}) = ", self.name, names(&self.axes))?;
        if self.has_reduce() {
            write!(f, "reduce[{}] ", names(&self.reduce_axes))?;
        }
        for (i, access) in self.reads.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let idx = access
                .indices
                .iter()
                .map(|idx| match idx {
                    AccessIndex::Axis(a) => self.axes.get(*a).map_or_else(|| "?".to_string(), |ax| ax.name.clone()),
                    AccessIndex::Reduce(r) => {
                        self.reduce_axes.get(*r).map_or_else(|| "?".to_string(), |ax| ax.name.clone())
                    }
                    AccessIndex::Const(c) => c.to_string(),
                    AccessIndex::Expr => "..".to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "{}[{idx}]", access.tensor)?;
        }
        Ok(())
    }
}
