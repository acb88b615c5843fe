//! Local HTTP server for the confirmation page
//!
//! Serves the rendered page on loopback and turns the page's form posts into
//! dispatcher actions. The restore runs on a worker thread so the page can
//! show its progress state while the helper works.
//!
//! Every form posts back a per-session token, so other pages open in the
//! browser cannot trigger actions on the loopback port.

use anyhow::{Context, Result, anyhow};
use rand::{Rng, distr::Alphanumeric};
use snapshot_restore_common::page::{self, PageState, PageView};
use snapshot_restore_common::{Action, SnapshotRef};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tiny_http::{Header, Response, Server};

use crate::dispatcher::ActionHandler;

/// Page state shared with the restore worker
#[derive(Debug, Default)]
struct Shared {
    page: PageState,
    notice: Option<String>,
}

/// HTTP answer produced by [`Ui::handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    /// Redirect target for 303 answers
    pub location: Option<&'static str>,
}

impl Reply {
    fn page(body: String) -> Self {
        Self {
            status: 200,
            body,
            location: None,
        }
    }

    fn see_other() -> Self {
        Self {
            status: 303,
            body: String::new(),
            location: Some("/"),
        }
    }

    fn forbidden() -> Self {
        Self {
            status: 403,
            body: "forbidden\n".to_string(),
            location: None,
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: "not found\n".to_string(),
            location: None,
        }
    }
}

pub struct Ui<H> {
    snapshot: SnapshotRef,
    token: String,
    shared: Arc<Mutex<Shared>>,
    handler: Arc<H>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn session_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn query_token(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| pair.strip_prefix("token="))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::error!("UI state mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

impl<H: ActionHandler + 'static> Ui<H> {
    pub fn new(snapshot: SnapshotRef, handler: H) -> Self {
        Self {
            snapshot,
            token: session_token(),
            shared: Arc::new(Mutex::new(Shared::default())),
            handler: Arc::new(handler),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PageState {
        lock(&self.shared).page.clone()
    }

    /// Render the page for the current state
    pub fn render(&self) -> String {
        let shared = lock(&self.shared);
        page::render_page(&PageView {
            snapshot: &self.snapshot,
            state: &shared.page,
            notice: shared.notice.as_deref(),
            token: Some(&self.token),
        })
    }

    /// Route one request
    pub fn handle(&self, method: &str, url: &str) -> Reply {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));

        if method == "POST" && query_token(query) != Some(self.token.as_str()) {
            log::warn!("Rejected {} without a valid session token", path);
            return match path {
                "/restore" | "/reboot" | "/back" => Reply::forbidden(),
                _ => Reply::not_found(),
            };
        }

        match (method, path) {
            ("GET", "/") => Reply::page(self.render()),
            ("POST", "/restore") => {
                self.start_restore();
                Reply::see_other()
            }
            ("POST", "/reboot") => {
                self.reboot();
                Reply::see_other()
            }
            ("POST", "/back") => {
                let mut shared = lock(&self.shared);
                if shared.page.back() {
                    shared.notice = None;
                }
                Reply::see_other()
            }
            _ => Reply::not_found(),
        }
    }

    fn start_restore(&self) {
        {
            let mut shared = lock(&self.shared);
            if !shared.page.begin_restore() {
                log::debug!("Restore requested in state {:?}, ignoring", shared.page);
                return;
            }
            shared.notice = None;
        }

        let shared = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.handler);
        let handle = std::thread::spawn(move || {
            let outcome = handler.dispatch(Action::Restore);
            lock(&shared).page.finish_restore(&outcome);
        });

        *lock(&self.worker) = Some(handle);
    }

    fn reboot(&self) {
        if !lock(&self.shared).page.can_reboot() {
            log::debug!("Reboot requested before restore, ignoring");
            return;
        }

        let outcome = self.handler.dispatch(Action::Reboot);
        if !outcome.is_success() {
            lock(&self.shared).notice = Some(outcome.message());
        }
    }

    /// Block until a running restore worker has finished
    pub fn wait_for_worker(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Restore worker panicked");
            }
        }
    }
}

/// Open the page with the configured browser command
fn open_browser(browser_command: &[String], url: &str) {
    let Some((program, args)) = browser_command.split_first() else {
        log::warn!("No browser command configured, open {} manually", url);
        return;
    };

    match std::process::Command::new(program).args(args).arg(url).spawn() {
        Ok(_) => log::info!("Opened {} with {}", url, program),
        Err(e) => log::warn!("Could not start {}: {}. Open {} manually", program, e, url),
    }
}

/// Serve the page until the process is stopped
pub fn serve<H: ActionHandler + 'static>(ui: Ui<H>, bind: &str, browser_command: &[String]) -> Result<()> {
    let server = Server::http(bind).map_err(|e| anyhow!("Failed to bind {}: {}", bind, e))?;
    let addr = server
        .server_addr()
        .to_ip()
        .context("Confirmation page is not listening on a TCP address")?;

    let url = format!("http://{}/", addr);
    log::info!("Confirmation page at {}", url);
    open_browser(browser_command, &url);

    for request in server.incoming_requests() {
        let reply = ui.handle(request.method().as_str(), request.url());

        let mut response = Response::from_string(reply.body).with_status_code(reply.status);
        if let Ok(ct) = Header::from_bytes(b"Content-Type", b"text/html; charset=utf-8") {
            response.add_header(ct);
        }
        if let Some(location) = reply.location {
            if let Ok(header) = Header::from_bytes(b"Location", location.as_bytes()) {
                response.add_header(header);
            }
        }

        if let Err(e) = request.respond(response) {
            log::warn!("Failed to answer request: {}", e);
        }
    }

    // A restore in flight must not be cut off by the process exiting
    ui.wait_for_worker();
    log::info!("Confirmation page closed in state {:?}", ui.state());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot_restore_common::ActionOutcome;
    use std::sync::mpsc;

    /// Answers with fixed outcomes; restore waits for a go signal if gated
    struct FakeHandler {
        calls: Mutex<Vec<Action>>,
        restore: ActionOutcome,
        reboot: ActionOutcome,
        gate: Option<Mutex<mpsc::Receiver<()>>>,
    }

    impl FakeHandler {
        fn new(restore: ActionOutcome, reboot: ActionOutcome) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                restore,
                reboot,
                gate: None,
            }
        }
    }

    impl ActionHandler for FakeHandler {
        fn dispatch(&self, action: Action) -> ActionOutcome {
            self.calls.lock().unwrap().push(action);
            match action {
                Action::Restore => {
                    if let Some(gate) = &self.gate {
                        gate.lock().unwrap().recv().unwrap();
                    }
                    self.restore.clone()
                }
                Action::Reboot => self.reboot.clone(),
            }
        }
    }

    fn snapshot() -> SnapshotRef {
        SnapshotRef::new("2023-10-28_12-00-00", None)
    }

    fn ui(restore: ActionOutcome, reboot: ActionOutcome) -> Ui<FakeHandler> {
        Ui::new(snapshot(), FakeHandler::new(restore, reboot))
    }

    fn post(ui: &Ui<FakeHandler>, route: &str) -> Reply {
        ui.handle("POST", &format!("{}?token={}", route, ui.token))
    }

    fn calls(ui: &Ui<FakeHandler>) -> Vec<Action> {
        ui.handler.calls.lock().unwrap().clone()
    }

    #[test]
    fn test_get_renders_initial_page() {
        let ui = ui(ActionOutcome::Success("ok".into()), ActionOutcome::Success("ok".into()));
        let reply = ui.handle("GET", "/");
        assert_eq!(reply.status, 200);
        assert!(reply.body.contains("action=\"/restore?token="));
        assert!(reply.body.contains("2023-10-28_12-00-00"));
    }

    #[test]
    fn test_successful_restore_then_reboot() {
        let ui = ui(ActionOutcome::Success("ok".into()), ActionOutcome::Success("Rebooting".into()));

        let reply = post(&ui, "/restore");
        assert_eq!(reply.status, 303);
        assert_eq!(reply.location, Some("/"));

        ui.wait_for_worker();
        assert_eq!(ui.state(), PageState::Restored);
        assert!(ui.handle("GET", "/").body.contains("action=\"/reboot?token="));

        post(&ui, "/reboot");
        assert_eq!(calls(&ui), vec![Action::Restore, Action::Reboot]);
    }

    #[test]
    fn test_failed_restore_shows_back() {
        let ui = ui(
            ActionOutcome::Failure("Authorization failed".into()),
            ActionOutcome::Success("ok".into()),
        );

        post(&ui, "/restore");
        ui.wait_for_worker();

        assert_eq!(ui.state(), PageState::Failed("Authorization failed".into()));
        let body = ui.handle("GET", "/").body;
        assert!(body.contains("Authorization failed"));
        assert!(body.contains("action=\"/back?token="));

        // Reboot is not offered after a failure
        post(&ui, "/reboot");
        assert_eq!(calls(&ui), vec![Action::Restore]);

        post(&ui, "/back");
        assert_eq!(ui.state(), PageState::Initial);
    }

    #[test]
    fn test_duplicate_restore_while_restoring_is_ignored() {
        let (tx, rx) = mpsc::channel();
        let mut handler = FakeHandler::new(
            ActionOutcome::Success("ok".into()),
            ActionOutcome::Success("ok".into()),
        );
        handler.gate = Some(Mutex::new(rx));
        let ui = Ui::new(snapshot(), handler);

        post(&ui, "/restore");
        assert_eq!(ui.state(), PageState::Restoring);
        assert!(ui.handle("GET", "/").body.contains("http-equiv=\"refresh\""));

        post(&ui, "/restore");

        tx.send(()).unwrap();
        ui.wait_for_worker();

        assert_eq!(ui.state(), PageState::Restored);
        assert_eq!(calls(&ui), vec![Action::Restore]);
    }

    #[test]
    fn test_failed_reboot_sets_notice() {
        let ui = ui(
            ActionOutcome::Success("ok".into()),
            ActionOutcome::Failure("Could not restart system: denied".into()),
        );

        post(&ui, "/restore");
        ui.wait_for_worker();
        post(&ui, "/reboot");

        assert_eq!(ui.state(), PageState::Restored);
        assert!(ui.handle("GET", "/").body.contains("Could not restart system: denied"));
    }

    #[test]
    fn test_unknown_routes() {
        let ui = ui(ActionOutcome::Success("ok".into()), ActionOutcome::Success("ok".into()));
        assert_eq!(ui.handle("GET", "/favicon.ico").status, 404);
        assert_eq!(ui.handle("GET", "/restore").status, 404);
        assert_eq!(ui.handle("DELETE", "/").status, 404);
        assert!(calls(&ui).is_empty());
    }

    #[test]
    fn test_posts_without_session_token_are_rejected() {
        let ui = ui(ActionOutcome::Success("ok".into()), ActionOutcome::Success("ok".into()));

        assert_eq!(ui.handle("POST", "/restore").status, 403);
        assert_eq!(ui.handle("POST", "/restore?token=guess").status, 403);
        assert_eq!(ui.handle("POST", "/reboot").status, 403);
        assert_eq!(ui.state(), PageState::Initial);
        assert!(calls(&ui).is_empty());

        assert_eq!(post(&ui, "/restore").status, 303);
        ui.wait_for_worker();
        assert_eq!(calls(&ui), vec![Action::Restore]);
    }

    #[test]
    fn test_page_carries_session_token() {
        let ui = ui(ActionOutcome::Success("ok".into()), ActionOutcome::Success("ok".into()));
        assert_eq!(ui.token.len(), 32);
        assert!(ui.handle("GET", "/").body.contains(&format!("?token={}", ui.token)));
    }

    #[test]
    fn test_query_string_is_ignored() {
        let ui = ui(ActionOutcome::Success("ok".into()), ActionOutcome::Success("ok".into()));
        assert_eq!(ui.handle("GET", "/?lang=en").status, 200);
    }
}
