use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("exit with no matching enter")]
    StackUnderflow,
    #[error("template references unbound field {field:?}")]
    MissingField { field: String },
    #[error("can't set attribute")]
    ImmutableAttribute,
    #[error("malformed template: {reason}")]
    Template { reason: String },
    #[error("bad format spec {spec:?} for field {field:?}")]
    FormatSpec { field: String, spec: String },
}
