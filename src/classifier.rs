use crate::config::ScriptPolicy;
use crate::extractors::scripts::ScriptElement;
use crate::patterns;
use mime::Mime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Ignored,
    Offloaded,
    Deferred,
    Untouched,
}

impl Classification {
    pub fn is_neutralized(self) -> bool {
        matches!(self, Classification::Offloaded | Classification::Deferred)
    }
}

/// Whether a `type` attribute value denotes a script the browser executes.
pub fn is_executable_type(script_type: &str) -> bool {
    let script_type = script_type.trim();
    if script_type.is_empty() || script_type.eq_ignore_ascii_case("module") {
        return true;
    }
    match script_type.parse::<Mime>() {
        Ok(m) => [mime::TEXT_JAVASCRIPT, mime::APPLICATION_JAVASCRIPT]
            .iter()
            .any(|x| m.essence_str().eq_ignore_ascii_case(x.essence_str())),
        Err(_) => false,
    }
}

/// Classifies one script. Priority is ignore marker, then offload, then defer.
pub fn classify(script: &ScriptElement, policy: &ScriptPolicy) -> Classification {
    if script.ignored {
        return Classification::Ignored;
    }
    if let Some(script_type) = &script.script_type {
        if !is_executable_type(script_type) {
            return Classification::Untouched;
        }
    }

    let candidate = script.candidate();
    if policy.offload.applies(script.above_the_fold)
        && patterns::matches(&candidate, &policy.offload.patterns)
    {
        return Classification::Offloaded;
    }
    if policy.defer.applies(script.above_the_fold)
        && patterns::matches(&candidate, &policy.defer.patterns)
    {
        return Classification::Deferred;
    }
    Classification::Untouched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PatternSet, When};
    use crate::patterns::Pattern;

    fn set(patterns: &[&str]) -> PatternSet {
        PatternSet {
            when: When::Always,
            patterns: patterns
                .iter()
                .map(|x| Pattern::Literal(x.to_string()))
                .collect(),
        }
    }

    fn policy(offload: &[&str], defer: &[&str]) -> ScriptPolicy {
        ScriptPolicy {
            offload: set(offload),
            defer: set(defer),
            ..ScriptPolicy::default()
        }
    }

    fn external(src: &str) -> ScriptElement {
        ScriptElement {
            src: Some(src.to_string()),
            ..ScriptElement::default()
        }
    }

    fn inline(content: &str) -> ScriptElement {
        ScriptElement {
            content: content.to_string(),
            ..ScriptElement::default()
        }
    }

    #[test]
    fn ignore_marker_always_wins() {
        let mut script = external("https://www.googletagmanager.com/gtm.js");
        script.ignored = true;
        let policy = policy(&["googletagmanager"], &["googletagmanager"]);
        assert_eq!(classify(&script, &policy), Classification::Ignored);
    }

    #[test]
    fn offload_wins_over_defer() {
        let script = external("https://www.googletagmanager.com/gtm.js");
        let policy = policy(&["googletagmanager"], &["gtm.js"]);
        assert_eq!(classify(&script, &policy), Classification::Offloaded);
    }

    #[test]
    fn defer_only_match() {
        let script = inline("var x=1;");
        let policy = policy(&["googletagmanager"], &["var x"]);
        assert_eq!(classify(&script, &policy), Classification::Deferred);
    }

    #[test]
    fn id_and_content_match_independently_of_src() {
        let mut by_id = external("/static/app.js");
        by_id.id = Some("hs-script-loader".to_string());
        let mut by_content = external("/static/app.js");
        by_content.content = "window.dataLayer = [];".to_string();
        let policy = policy(&["hs-script-loader", "dataLayer"], &[]);
        assert_eq!(classify(&by_id, &policy), Classification::Offloaded);
        assert_eq!(classify(&by_content, &policy), Classification::Offloaded);
    }

    #[test]
    fn no_match_is_untouched() {
        let script = inline("console.log('hi')");
        let policy = policy(&["googletagmanager"], &["posthog"]);
        assert_eq!(classify(&script, &policy), Classification::Untouched);
    }

    #[test]
    fn non_javascript_types_are_never_neutralized() {
        let mut script = inline(r#"{"@context": "https://schema.org", "url": "googletagmanager"}"#);
        script.script_type = Some("application/ld+json".to_string());
        let policy = policy(&["googletagmanager"], &["schema.org"]);
        assert_eq!(classify(&script, &policy), Classification::Untouched);

        script.script_type = Some("text/plain".to_string());
        assert_eq!(classify(&script, &policy), Classification::Untouched);
    }

    #[test]
    fn executable_types() {
        assert!(is_executable_type(""));
        assert!(is_executable_type("module"));
        assert!(is_executable_type("text/javascript"));
        assert!(is_executable_type("Text/JavaScript; charset=utf-8"));
        assert!(is_executable_type("application/javascript"));
        assert!(!is_executable_type("application/ld+json"));
        assert!(!is_executable_type("text/template"));
        assert!(!is_executable_type("text/partytown"));
    }

    #[test]
    fn below_the_fold_sets_skip_head_scripts() {
        let mut script = external("https://cdn.jsdelivr.net/npm/lib.js");
        script.above_the_fold = true;
        let mut policy = policy(&["jsdelivr"], &["jsdelivr"]);
        policy.offload.when = When::BelowTheFold;
        assert_eq!(classify(&script, &policy), Classification::Deferred);

        policy.defer.when = When::Never;
        assert_eq!(classify(&script, &policy), Classification::Untouched);

        script.above_the_fold = false;
        assert_eq!(classify(&script, &policy), Classification::Offloaded);
    }
}
