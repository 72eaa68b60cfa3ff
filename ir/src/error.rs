use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Two operations share a name.
    #[snafu(display("duplicate operation name {name:?}"))]
    DuplicateOp { name: String },

    /// An access refers to a tensor that is not defined before its reader.
    #[snafu(display("operation {op:?} reads unknown tensor {tensor:?}"))]
    UnknownTensor { op: String, tensor: String },

    /// Access index count differs from the producer's dimensionality.
    #[snafu(display("operation {op:?} indexes {tensor:?} with {got} indices, tensor has {expected} dimensions"))]
    AccessArity { op: String, tensor: String, expected: usize, got: usize },

    /// An access index names an axis the reader does not have.
    #[snafu(display("operation {op:?} refers to axis {axis} but has only {count}"))]
    AxisOutOfBounds { op: String, axis: usize, count: usize },

    /// Operations are not listed producers-first.
    #[snafu(display("operation {op:?} reads {tensor:?} which is defined after it"))]
    NotTopological { op: String, tensor: String },

    /// A compute operation without any axis.
    #[snafu(display("compute operation {op:?} has an empty iteration space"))]
    EmptyShape { op: String },
}
