//! Confirmation page rendering
//!
//! The page is plain HTML with forms posting back to the local UI server, so
//! any browser (or browser-like shell) can display it. Rendering is pure: it
//! only depends on the [`PageView`] it is given.

use crate::action::ActionOutcome;
use crate::cmdline::SnapshotRef;

/// Where the user is in the restore flow
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageState {
    /// Snapshot boot detected, nothing done yet
    #[default]
    Initial,
    /// Restore handed off to the helper, waiting for the result
    Restoring,
    /// Restore succeeded, reboot pending
    Restored,
    /// Restore failed with the given reason
    Failed(String),
}

impl PageState {
    /// Move to `Restoring`; only allowed from `Initial`
    pub fn begin_restore(&mut self) -> bool {
        if *self == PageState::Initial {
            *self = PageState::Restoring;
            true
        } else {
            false
        }
    }

    /// Record the result of a restore; ignored unless `Restoring`
    pub fn finish_restore(&mut self, outcome: &ActionOutcome) {
        if *self != PageState::Restoring {
            log::warn!("Ignoring restore result in state {:?}", self);
            return;
        }

        *self = match outcome {
            ActionOutcome::Success(_) => PageState::Restored,
            other => PageState::Failed(other.message()),
        };
    }

    /// Return to `Initial`; only allowed from `Failed`
    pub fn back(&mut self) -> bool {
        if matches!(self, PageState::Failed(_)) {
            *self = PageState::Initial;
            true
        } else {
            false
        }
    }

    pub fn can_reboot(&self) -> bool {
        *self == PageState::Restored
    }
}

/// Everything the page shows
#[derive(Debug, Clone)]
pub struct PageView<'a> {
    pub snapshot: &'a SnapshotRef,
    pub state: &'a PageState,
    /// Extra message, e.g. a failed reboot
    pub notice: Option<&'a str>,
    /// Session token appended to every form action
    pub token: Option<&'a str>,
}

const STYLE: &str = "body{font-family:sans-serif;max-width:520px;margin:30px auto;text-align:center}\
    table{margin:20px auto;text-align:left}th{padding-right:16px}\
    button{padding:10px 40px;border-radius:20px;border:none;font-size:1em}\
    .suggested{background:#3584e4;color:#fff}.destructive{background:#e01b24;color:#fff}\
    .success{color:#26a269}.error{color:#c01c28}";

/// Escape text for use in HTML content and attribute values
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn button(view: &PageView<'_>, action: &str, label: &str, class: &str) -> String {
    let target = match view.token {
        Some(token) => format!("/{}?token={}", action, escape_html(token)),
        None => format!("/{}", action),
    };
    format!(
        "<form method=\"post\" action=\"{}\"><button type=\"submit\" class=\"{}\">{}</button></form>",
        target, class, label
    )
}

fn info_table(snapshot: &SnapshotRef) -> String {
    let mut rows = String::new();
    let mut row = |title: &str, value: Option<String>| {
        if let Some(value) = value {
            rows.push_str(&format!(
                "<tr><th>{}</th><td>{}</td></tr>",
                title,
                escape_html(&value)
            ));
        }
    };

    row("File", snapshot.subvol_path.clone());
    row("Date", snapshot.display_date());
    row("Time", snapshot.display_time());

    format!("<h2>Snapshot Information</h2><table>{}</table>", rows)
}

fn state_body(view: &PageView<'_>) -> String {
    match view.state {
        PageState::Initial => format!(
            "{}<p>The system was booted from a restore point, also called a Snapshot.</p>\
             <p>If you want to make this restore point the default boot option, \
             click the Restore button or use Timeshift for more options.</p>{}",
            info_table(view.snapshot),
            button(view, "restore", "Restore System", "suggested")
        ),
        PageState::Restoring => "<p><progress></progress></p>\
             <p>Restoring... This can take a few minutes, do not turn off the computer.</p>"
            .to_string(),
        PageState::Restored => format!(
            "<p class=\"success\">Restoration completed successfully! Please reboot the system.</p>{}",
            button(view, "reboot", "Restart", "destructive")
        ),
        PageState::Failed(reason) => format!(
            "<p class=\"error\">Error: {}</p>{}",
            escape_html(reason),
            button(view, "back", "Back", "")
        ),
    }
}

/// Render the full page for the current state
pub fn render_page(view: &PageView<'_>) -> String {
    let refresh = if *view.state == PageState::Restoring {
        "<meta http-equiv=\"refresh\" content=\"2\">"
    } else {
        ""
    };

    let notice = view
        .notice
        .map(|n| format!("<p class=\"error\">{}</p>", escape_html(n)))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">{refresh}\
         <title>Snapshot {name}</title><style>{STYLE}</style></head>\
         <body><h1>Timeshift</h1><p>Snapshot {name}</p>{body}{notice}</body></html>\n",
        refresh = refresh,
        name = escape_html(&view.snapshot.name),
        body = state_body(view),
        notice = notice,
    )
}

/// Render the short HTML fragment the dispatcher prints for an outcome
pub fn render_fragment(outcome: &ActionOutcome) -> String {
    let (class, text) = match outcome {
        ActionOutcome::Success(msg) => ("success", msg.clone()),
        ActionOutcome::Failure(msg) => ("error", format!("Error: {}", msg)),
        ActionOutcome::InvalidAction(_) => ("error", outcome.message()),
    };
    format!("<div class=\"result {}\"><p>{}</p></div>", class, escape_html(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SnapshotRef {
        SnapshotRef::new(
            "2023-10-28_12-00-00",
            Some("timeshift-btrfs/snapshots/2023-10-28_12-00-00/@".to_string()),
        )
    }

    fn render(state: PageState) -> String {
        let snapshot = snapshot();
        render_page(&PageView {
            snapshot: &snapshot,
            state: &state,
            notice: None,
            token: None,
        })
    }

    #[test]
    fn test_initial_page_offers_restore() {
        let html = render(PageState::Initial);
        assert!(html.contains("Snapshot 2023-10-28_12-00-00"));
        assert!(html.contains("28/10/2023"));
        assert!(html.contains("12:00:00"));
        assert!(html.contains("action=\"/restore\""));
        assert!(!html.contains("action=\"/reboot\""));
        assert!(!html.contains("http-equiv=\"refresh\""));
    }

    #[test]
    fn test_restoring_page_has_no_buttons_and_refreshes() {
        let html = render(PageState::Restoring);
        assert!(!html.contains("<form"));
        assert!(html.contains("http-equiv=\"refresh\""));
    }

    #[test]
    fn test_restored_page_offers_reboot() {
        let html = render(PageState::Restored);
        assert!(html.contains("action=\"/reboot\""));
        assert!(!html.contains("action=\"/restore\""));
    }

    #[test]
    fn test_failed_page_offers_back_and_escapes_reason() {
        let html = render(PageState::Failed("<script>x</script>".to_string()));
        assert!(html.contains("action=\"/back\""));
        assert!(html.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_notice_is_rendered() {
        let snapshot = snapshot();
        let html = render_page(&PageView {
            snapshot: &snapshot,
            state: &PageState::Restored,
            notice: Some("Could not restart system"),
            token: None,
        });
        assert!(html.contains("Could not restart system"));
    }

    #[test]
    fn test_token_is_added_to_form_actions() {
        let snapshot = snapshot();
        let html = render_page(&PageView {
            snapshot: &snapshot,
            state: &PageState::Initial,
            notice: None,
            token: Some("Ab12"),
        });
        assert!(html.contains("action=\"/restore?token=Ab12\""));
    }

    #[test]
    fn test_state_transitions() {
        let mut state = PageState::default();
        assert!(state.begin_restore());
        assert_eq!(state, PageState::Restoring);

        // Duplicate request while restoring
        assert!(!state.begin_restore());

        state.finish_restore(&ActionOutcome::Failure("timeshift failed".into()));
        assert_eq!(state, PageState::Failed("timeshift failed".into()));
        assert!(!state.can_reboot());

        assert!(state.back());
        assert_eq!(state, PageState::Initial);

        assert!(state.begin_restore());
        state.finish_restore(&ActionOutcome::Success("ok".into()));
        assert_eq!(state, PageState::Restored);
        assert!(state.can_reboot());
        assert!(!state.back());
        assert!(!state.begin_restore());
    }

    #[test]
    fn test_finish_restore_outside_restoring_is_ignored() {
        let mut state = PageState::Initial;
        state.finish_restore(&ActionOutcome::Success("ok".into()));
        assert_eq!(state, PageState::Initial);
    }

    #[test]
    fn test_render_fragment() {
        assert_eq!(
            render_fragment(&ActionOutcome::Success("Snapshot restored".into())),
            "<div class=\"result success\"><p>Snapshot restored</p></div>"
        );
        assert!(render_fragment(&ActionOutcome::Failure("bad & worse".into()))
            .contains("Error: bad &amp; worse"));
        assert!(render_fragment(&ActionOutcome::InvalidAction("x".into()))
            .contains("Unknown action"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
        assert_eq!(escape_html("plain"), "plain");
    }
}
