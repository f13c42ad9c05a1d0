//! Scoped session use: acquire, run, always release.

use futures::future::BoxFuture;

use crate::pool::{Session, SessionPool};
use crate::types::ScoutResult;

/// Run `op` against a fresh session and release it afterwards, whatever
/// `op` returned.
///
/// If the returned future is dropped mid-flight, the session's drop path
/// schedules the close instead.
pub async fn with_session<T, F>(pool: &SessionPool, op: F) -> ScoutResult<T>
where
    F: for<'s> FnOnce(&'s Session) -> BoxFuture<'s, ScoutResult<T>>,
{
    let session = pool.acquire().await?;
    let outcome = op(&session).await;
    pool.release(session).await;
    outcome
}
