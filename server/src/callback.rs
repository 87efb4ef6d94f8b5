//! OAuth loopback callback forwarder
//!
//! Provider OAuth apps redirect to a fixed localhost port. For each WebUI
//! flow a small listener on that port forwards the code-bearing redirect to
//! the management callback, then exits after the first hit or ten minutes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::RawQuery;
use axum::response::Redirect;
use axum::Router;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Spawn a forwarder from `127.0.0.1:<port>` to the management callback for
/// `provider`. Silently skips when the port is already taken (a forwarder
/// from an earlier start call is still listening).
pub fn spawn_callback_forwarder(provider: &str, port: u16, management_port: u16) {
    let provider = provider.to_string();
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                debug!(provider, port, error = %err, "callback port busy, forwarder not started");
                return;
            }
        };

        let (hit_tx, hit_rx) = oneshot::channel::<()>();
        let hit_tx = Arc::new(Mutex::new(Some(hit_tx)));

        let target =
            format!("http://localhost:{management_port}/v0/management/oauth/callback/{provider}");
        let app = Router::new().fallback(move |RawQuery(query): RawQuery| {
            let target = target.clone();
            let hit_tx = hit_tx.clone();
            async move {
                if let Some(tx) = hit_tx.lock().expect("forwarder lock poisoned").take() {
                    let _ = tx.send(());
                }
                let location = match query {
                    Some(query) => format!("{target}?{query}"),
                    None => target,
                };
                Redirect::temporary(&location)
            }
        });

        let serve = axum::serve(listener, app);
        tokio::select! {
            result = serve => {
                if let Err(err) = result {
                    warn!(port, error = %err, "callback forwarder failed");
                }
            }
            // First redirect observed: give the browser a moment to follow
            // it, then shut down.
            _ = async {
                let _ = hit_rx.await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            } => {}
            _ = tokio::time::sleep(Duration::from_secs(600)) => {}
        }
    });
}
