//! Storage for cargo views.
//!
//! The read model is rebuilt from events, so the in-memory repository is the
//! default store of a tracking instance.

use crate::view::CargoView;
use shipping_bus_core::handler::HandlerError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors returned by a [`CargoViewRepository`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No view exists for the tracking id
    #[error("Unknown cargo: {0}")]
    UnknownCargo(String),

    /// The backing store failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for HandlerError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::UnknownCargo(id) => Self::NotFound(id),
            RepositoryError::Storage(reason) => Self::Repository(reason),
        }
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Stores and retrieves cargo views by tracking id.
pub trait CargoViewRepository: Send + Sync + 'static {
    /// Insert or replace the view for `view.tracking_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the store rejects the write.
    fn store(&self, view: CargoView) -> impl Future<Output = Result<()>> + Send;

    /// Look up a view.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::UnknownCargo`] if no view exists for `tracking_id`.
    fn find(&self, tracking_id: &str) -> impl Future<Output = Result<CargoView>> + Send;

    /// Every stored view, ordered by tracking id.
    fn find_all(&self) -> impl Future<Output = Vec<CargoView>> + Send;
}

/// `HashMap`-backed repository. Clones share the same map.
///
/// # Example
///
/// ```
/// use shipping_bus_core::schema::NewCargoBooked;
/// use shipping_tracking::repository::{CargoViewRepository, InMemoryCargoViewRepository};
/// use shipping_tracking::view::CargoView;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cargos = InMemoryCargoViewRepository::new();
/// let booked = NewCargoBooked { tracking_id: "ABC123".into(), ..Default::default() };
/// cargos.store(CargoView::booked(&booked)).await?;
///
/// assert_eq!(cargos.find("ABC123").await?.tracking_id, "ABC123");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCargoViewRepository {
    cargos: Arc<RwLock<HashMap<String, CargoView>>>,
}

impl InMemoryCargoViewRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cargos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no view is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CargoViewRepository for InMemoryCargoViewRepository {
    async fn store(&self, view: CargoView) -> Result<()> {
        self.cargos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(view.tracking_id.clone(), view);
        Ok(())
    }

    async fn find(&self, tracking_id: &str) -> Result<CargoView> {
        self.cargos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tracking_id)
            .cloned()
            .ok_or_else(|| RepositoryError::UnknownCargo(tracking_id.to_string()))
    }

    async fn find_all(&self) -> Vec<CargoView> {
        let mut views: Vec<CargoView> = self
            .cargos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        views.sort_by(|a, b| a.tracking_id.cmp(&b.tracking_id));
        views
    }
}
