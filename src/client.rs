//! Client facade
//!
//! Wires the context, the connection manager and the dispatcher together and
//! exposes submit-and-wait record operations.
//!
//! ```text
//!   Client ──submit──▶ RequestDispatcher (workers) ──▶ RequestQueue
//!                                                         │
//!                    relaykv-io thread: ConnectionManager ◀┘ ──▶ proxy
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::context::{ClientContext, ClientStats};
use crate::dispatcher::{RequestDispatcher, ResponseHandle};
use crate::error::Result;
use crate::network::{ConnectionManager, ConnectionState};
use crate::request::{Request, Response};

/// A connected relaykv client
pub struct Client {
    ctx: Arc<ClientContext>,
    dispatcher: RequestDispatcher,
    io_thread: Option<JoinHandle<()>>,
}

impl Client {
    /// Validate `config`, start the I/O loop and the worker pool.
    ///
    /// Returns once the background threads are running; the first connect
    /// happens asynchronously (see `wait_connected`).
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let ctx = ClientContext::new(config);

        let manager = ConnectionManager::new(Arc::clone(&ctx))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let io_thread = thread::Builder::new()
            .name("relaykv-io".to_string())
            .spawn(move || runtime.block_on(manager.run()))?;

        let dispatcher = match RequestDispatcher::new(Arc::clone(&ctx)) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                ctx.begin_shutdown();
                let _ = io_thread.join();
                return Err(e);
            }
        };

        tracing::info!(
            "Client started for {} (namespace {})",
            ctx.config().endpoint(),
            ctx.config().namespace
        );
        Ok(Self {
            ctx,
            dispatcher,
            io_thread: Some(io_thread),
        })
    }

    pub fn config(&self) -> &Config {
        self.ctx.config()
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    /// Block until the first connection is up; false on timeout
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.ctx.wait_connected(timeout)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.ctx.connection_state()
    }

    pub fn stats(&self) -> ClientStats {
        self.ctx.stats()
    }

    /// Submit without waiting
    pub fn submit(&self, request: Request) -> ResponseHandle {
        self.dispatcher.submit(request)
    }

    // =========================================================================
    // Blocking Operations
    // =========================================================================

    pub fn create(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<Response> {
        self.submit(Request::create(key, value)).wait()
    }

    pub fn create_with_ttl(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl_secs: u32,
    ) -> Result<Response> {
        self.submit(Request::create(key, value).with_ttl(ttl_secs)).wait()
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Response> {
        self.submit(Request::get(key)).wait()
    }

    /// Read and extend the record's TTL to at least `ttl_secs`
    pub fn get_with_ttl(&self, key: impl AsRef<[u8]>, ttl_secs: u32) -> Result<Response> {
        self.submit(Request::get(key).with_ttl(ttl_secs)).wait()
    }

    pub fn update(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<Response> {
        self.submit(Request::update(key, value)).wait()
    }

    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<Response> {
        self.submit(Request::set(key, value)).wait()
    }

    pub fn destroy(&self, key: impl AsRef<[u8]>) -> Result<Response> {
        self.submit(Request::destroy(key)).wait()
    }

    /// Update only if the stored version is still `version`
    pub fn compare_and_set(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        version: u32,
    ) -> Result<Response> {
        self.submit(Request::compare_and_set(key, value, version)).wait()
    }

    /// Submit a batch and collect the outcomes in submission order
    pub fn execute_all(&self, requests: Vec<Request>) -> Vec<Result<Response>> {
        let handles: Vec<_> = requests.into_iter().map(|r| self.submit(r)).collect();
        handles.into_iter().map(ResponseHandle::wait).collect()
    }

    /// Stop the workers and the I/O loop
    pub fn shutdown(&mut self) {
        if self.io_thread.is_none() {
            return;
        }
        self.ctx.begin_shutdown();
        self.dispatcher.shutdown();
        if let Some(handle) = self.io_thread.take() {
            if handle.join().is_err() {
                tracing::error!("I/O thread panicked");
            }
        }
        tracing::info!("Client stopped: {:?}", self.ctx.stats());
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.ctx.config().endpoint())
            .field("state", &self.ctx.connection_state())
            .finish()
    }
}

