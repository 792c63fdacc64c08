use async_trait::async_trait;
use thiserror::Error;

use leaveflow_core::domain::employee::{Department, Employee};
use leaveflow_core::domain::leave_type::LeaveType;
use leaveflow_core::workflow::{Directory, StoreError};

pub mod directory;
pub mod leave;
pub mod memory;

pub use leave::SqlLeaveStore;
pub use memory::InMemoryLeaveStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Store(error) => error,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Write side of the organisation directory. The workflow itself only reads it; seeding, the
/// CLI and tests use these to populate a store.
#[async_trait]
pub trait DirectoryRepository: Directory {
    async fn save_department(&self, department: Department) -> Result<(), RepositoryError>;
    async fn save_employee(&self, employee: Employee) -> Result<(), RepositoryError>;
    async fn save_leave_type(&self, leave_type: LeaveType) -> Result<(), RepositoryError>;
}
