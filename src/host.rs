//! The server-rendered block the controller works in.
//!
//! Only a handful of class-addressed nodes are touched; everything else in
//! the markup belongs to the template that rendered it.

use kuchiki::traits::*;
use kuchiki::NodeRef;
use tracing::debug;

use crate::bridge::ScoreUpdate;

pub const LAUNCHER: &str = ".scorm_launch";
pub const SHOW_INLINE: &str = ".scorm_show";
pub const POPUP_WARNING: &str = ".scorm_popup_warning";
pub const LESSON_SCORE: &str = ".lesson_score";
pub const COMPLETION_STATUS: &str = ".completion_status";
pub const FRAME_CONTAINER: &str = ".scorm_window";
pub const INLINE_FRAME: &str = ".scorm-iframe";

pub struct HostPage {
    document: NodeRef,
}

impl HostPage {
    pub fn parse(html: &str) -> Self {
        Self {
            document: kuchiki::parse_html().one(html),
        }
    }

    fn first(&self, selector: &str) -> Option<NodeRef> {
        self.document
            .select_first(selector)
            .ok()
            .map(|element| element.as_node().clone())
    }

    pub fn contains(&self, selector: &str) -> bool {
        self.first(selector).is_some()
    }

    pub fn text(&self, selector: &str) -> Option<String> {
        self.first(selector).map(|node| node.text_contents())
    }

    /// Replace the content of the first node matching `selector` with text.
    pub fn set_text(&self, selector: &str, value: &str) -> bool {
        let Some(node) = self.first(selector) else {
            return false;
        };
        for child in node.children().collect::<Vec<_>>() {
            child.detach();
        }
        node.append(NodeRef::new_text(value));
        true
    }

    pub fn apply_update(&self, update: &ScoreUpdate) {
        if let Some(score) = &update.lesson_score {
            self.set_text(LESSON_SCORE, score);
        }
        if let Some(status) = &update.completion_status {
            self.set_text(COMPLETION_STATUS, status);
        }
        debug!(target: "display", ?update, "host page updated");
    }

    /// Swap the frame container for `markup`. Returns `false` when the
    /// container is gone (already replaced earlier).
    pub fn replace_container(&self, markup: &str) -> bool {
        let Some(container) = self.first(FRAME_CONTAINER) else {
            return false;
        };
        let fragment = kuchiki::parse_html().one(markup);
        let Some(body) = fragment
            .select_first("body")
            .ok()
            .map(|body| body.as_node().clone())
        else {
            return false;
        };
        for node in body.children().collect::<Vec<_>>() {
            node.detach();
            container.insert_before(node);
        }
        container.detach();
        true
    }

    /// jQuery's `.show()`: drop `display: none` and the `hidden` attribute.
    pub fn show(&self, selector: &str) -> bool {
        let Some(node) = self.first(selector) else {
            return false;
        };
        let Some(element) = node.as_element() else {
            return false;
        };
        let mut attributes = element.attributes.borrow_mut();
        attributes.remove("hidden");
        if let Some(style) = attributes.get("style").map(str::to_string) {
            let kept: Vec<&str> = style
                .split(';')
                .map(str::trim)
                .filter(|rule| !rule.is_empty())
                .filter(|rule| {
                    let compact: String = rule.chars().filter(|c| !c.is_whitespace()).collect();
                    !compact.eq_ignore_ascii_case("display:none")
                })
                .collect();
            if kept.is_empty() {
                attributes.remove("style");
            } else {
                attributes.insert("style", kept.join("; "));
            }
        }
        true
    }

    pub fn is_visible(&self, selector: &str) -> bool {
        let Some(node) = self.first(selector) else {
            return false;
        };
        let Some(element) = node.as_element() else {
            return false;
        };
        let attributes = element.attributes.borrow();
        if attributes.contains("hidden") {
            return false;
        }
        let hidden_by_style = attributes.get("style").is_some_and(|style| {
            style
                .split(';')
                .map(|rule| rule.chars().filter(|c| !c.is_whitespace()).collect::<String>())
                .any(|rule| rule.eq_ignore_ascii_case("display:none"))
        });
        !hidden_by_style
    }

    pub fn to_html(&self) -> String {
        self.document.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = r#"<div class="scorm_block">
        <div class="scorm_window"><button class="scorm_launch">Launch</button></div>
        <p class="scorm_popup_warning" style="display: none; color: red">Opened in a new window</p>
        <span class="lesson_score">0</span>
        <span class="completion_status">not attempted</span>
    </div>"#;

    #[test]
    fn update_with_score_and_status_touches_both_nodes() {
        let page = HostPage::parse(BLOCK);
        page.apply_update(&ScoreUpdate {
            lesson_score: Some("0.8".into()),
            completion_status: Some("passed".into()),
        });
        assert_eq!(page.text(LESSON_SCORE).as_deref(), Some("0.8"));
        assert_eq!(page.text(COMPLETION_STATUS).as_deref(), Some("passed"));
    }

    #[test]
    fn update_without_score_leaves_score_alone() {
        let page = HostPage::parse(BLOCK);
        page.apply_update(&ScoreUpdate {
            lesson_score: None,
            completion_status: Some("incomplete".into()),
        });
        assert_eq!(page.text(LESSON_SCORE).as_deref(), Some("0"));
        assert_eq!(page.text(COMPLETION_STATUS).as_deref(), Some("incomplete"));
    }

    #[test]
    fn container_is_replaced_once() {
        let page = HostPage::parse(BLOCK);
        assert!(page.replace_container(r#"<iframe class="scorm-iframe scorm_object" width="805" height="605"></iframe>"#));
        assert!(!page.contains(FRAME_CONTAINER));
        assert!(page.contains(INLINE_FRAME));
        assert!(!page.replace_container("<iframe></iframe>"));
    }

    #[test]
    fn show_reveals_hidden_warning() {
        let page = HostPage::parse(BLOCK);
        assert!(!page.is_visible(POPUP_WARNING));
        assert!(page.show(POPUP_WARNING));
        assert!(page.is_visible(POPUP_WARNING));
        assert!(page.to_html().contains("color: red"));
    }
}
