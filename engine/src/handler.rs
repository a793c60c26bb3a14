//! The reconciliation callback supplied by the embedding application.

use crate::{HandlerError, ObjectKey};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;

/// Reconciles the object behind one key.
///
/// Implemented for any `Fn(ObjectKey) -> impl Future<Output = Result<(), HandlerError>>`,
/// so plain async closures can be passed wherever a handler is expected.
pub trait Handler: Send + Sync + 'static {
    fn sync(&self, key: ObjectKey) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(ObjectKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn sync(&self, key: ObjectKey) -> BoxFuture<'static, Result<(), HandlerError>> {
        self(key).boxed()
    }
}
