//! Fixed-size pool of browser instances.
//!
//! Every instance is launched up front and terminated only by [`BrowserPool::close`].
//! A semaphore with one permit per instance makes `acquire` wait while all of
//! them are checked out.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::browser::{BrowserDriver, BrowserLauncher};
use super::error::Tor2TorError;

#[derive(Debug)]
pub struct BrowserPool<D> {
    idle: Mutex<VecDeque<D>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl<D: BrowserDriver + 'static> BrowserPool<D> {
    /// Launches `size` instances concurrently. If one fails, those already
    /// running are shut down again and the launch error is returned.
    pub async fn open<L>(launcher: &L, size: usize) -> Result<Arc<Self>, Tor2TorError>
    where
        L: BrowserLauncher<Driver = D>,
    {
        info!("Opening {size} browser instances");
        let launches = (1..=size).map(|id| async move { (id, launcher.launch(id).await) });
        let results = futures::future::join_all(launches).await;

        let mut handles = Vec::with_capacity(size);
        let mut failure = None;
        for (id, result) in results {
            match result {
                Ok(handle) => handles.push(handle),
                Err(source) if failure.is_none() => {
                    failure = Some(Tor2TorError::BrowserLaunch { id, source })
                }
                Err(source) => warn!("browser {id} also failed to launch: {source}"),
            }
        }

        if let Some(err) = failure {
            for mut handle in handles {
                if let Err(e) = handle.quit().await {
                    warn!("failed to stop browser after aborted pool launch: {e}");
                }
            }
            return Err(err);
        }

        Ok(Arc::new(Self::with_handles(handles)))
    }

    pub fn with_handles(handles: Vec<D>) -> Self {
        let size = handles.len();
        Self {
            idle: Mutex::new(handles.into()),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Checks out one instance, waiting until another holder returns one if necessary.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledBrowser<D>, Tor2TorError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Tor2TorError::PoolClosed)?;
        let handle = self
            .idle
            .lock()
            .pop_front()
            .ok_or(Tor2TorError::PoolClosed)?;
        Ok(PooledBrowser {
            handle: Some(handle),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Number of instances the pool was opened with.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Terminates every idle instance and refuses further checkouts.
    /// Returns how many instances were terminated; calling it again is harmless.
    pub async fn close(&self) -> usize {
        self.permits.close();
        let handles = std::mem::take(&mut *self.idle.lock());

        let mut terminated = 0;
        for mut handle in handles {
            if let Err(e) = handle.quit().await {
                warn!("failed to quit browser: {e}");
            }
            terminated += 1;
        }
        if terminated > 0 {
            info!("Closed {terminated} browser instances");
        }
        terminated
    }

    fn release(&self, handle: D) {
        self.idle.lock().push_back(handle);
    }
}

/// A checked-out browser. Goes back to the pool when dropped, whatever happened while it was held.
#[derive(Debug)]
pub struct PooledBrowser<D: BrowserDriver + 'static> {
    // Always `Some` until `drop` takes it, so deref cannot observe `None`.
    handle: Option<D>,
    pool: Arc<BrowserPool<D>>,
    // Released after the handle is back in `idle`.
    _permit: OwnedSemaphorePermit,
}

impl<D: BrowserDriver + 'static> Deref for PooledBrowser<D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.handle.as_ref().expect("browser should be present")
    }
}

impl<D: BrowserDriver + 'static> DerefMut for PooledBrowser<D> {
    fn deref_mut(&mut self) -> &mut D {
        self.handle.as_mut().expect("browser should be present")
    }
}

impl<D: BrowserDriver + 'static> Drop for PooledBrowser<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
            debug!("browser returned to pool");
        }
    }
}
