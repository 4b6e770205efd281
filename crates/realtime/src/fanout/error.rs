#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FanoutError {
    #[error("client not found")]
    ClientNotFound,
}
