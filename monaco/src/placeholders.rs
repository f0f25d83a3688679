//! `$NAME` placeholder substitution.
//!
//! Supported: `$CONTEXT`, `$EVENT`, `$SOURCE`, `$PROJECT`, `$STAGE`,
//! `$SERVICE`, `$DEPLOYMENT`, `$TESTSTRATEGY`, `$LABEL.<key>` and
//! `$ENV.<name>`. Every substituted value is URL query escaped with spaces
//! written as `%20`.

use keptn::events::KeptnEvent;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Bytes left as is by query escaping: letters, digits and `-_.~`.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Substitutes placeholders using the current process environment for `$ENV.*`.
pub fn replace_placeholders(input: &str, event: &KeptnEvent) -> String {
    replace_placeholders_with_env(input, event, shared::env::utf8_vars())
}

pub fn replace_placeholders_with_env(
    input: &str,
    event: &KeptnEvent,
    env: impl IntoIterator<Item = (String, String)>,
) -> String {
    let mut result = input.to_string();

    for (placeholder, value) in [
        ("$CONTEXT", &event.context),
        ("$EVENT", &event.event),
        ("$SOURCE", &event.source),
        ("$PROJECT", &event.project),
        ("$STAGE", &event.stage),
        ("$SERVICE", &event.service),
        ("$DEPLOYMENT", &event.deployment),
        ("$TESTSTRATEGY", &event.test_strategy),
    ] {
        result = result.replace(placeholder, &escape(value));
    }

    // Longest keys first so `$LABEL.ab` is not eaten by `$LABEL.a`
    let mut labels: Vec<(&String, &String)> = event.labels.iter().collect();
    labels.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    for (key, value) in labels {
        result = result.replace(&format!("$LABEL.{key}"), &escape(value));
    }

    let mut env: Vec<(String, String)> = env.into_iter().collect();
    env.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    for (key, value) in env {
        result = result.replace(&format!("$ENV.{key}"), &escape(&value));
    }

    result
}

fn escape(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ESCAPE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event() -> KeptnEvent {
        KeptnEvent {
            context: "ctx-1".into(),
            event: "sh.keptn.event.monaco.triggered".into(),
            source: "shipyard-controller".into(),
            project: "sockshop".into(),
            stage: "production".into(),
            service: "carts".into(),
            deployment: "direct".into(),
            test_strategy: "performance".into(),
            labels: HashMap::from([
                ("owner".to_string(), "team a".to_string()),
                ("own".to_string(), "short".to_string()),
                ("url".to_string(), "a/b?c=d&e".to_string()),
            ]),
        }
    }

    #[test]
    fn test_event_placeholders() {
        let out = replace_placeholders_with_env(
            "$PROJECT-$STAGE-$SERVICE|$CONTEXT|$EVENT|$SOURCE|$DEPLOYMENT|$TESTSTRATEGY",
            &event(),
            [],
        );
        assert_eq!(
            out,
            "sockshop-production-carts|ctx-1|sh.keptn.event.monaco.triggered|shipyard-controller|direct|performance"
        );
    }

    #[test]
    fn test_secret_name_template() {
        let out = replace_placeholders_with_env("dynatrace-$PROJECT-$STAGE", &event(), []);
        assert_eq!(out, "dynatrace-sockshop-production");
    }

    #[test]
    fn test_labels_are_escaped_and_longest_first() {
        let out = replace_placeholders_with_env(
            "$LABEL.owner/$LABEL.own/$LABEL.url/$LABEL.missing",
            &event(),
            [],
        );
        assert_eq!(out, "team%20a/short/a%2Fb%3Fc%3Dd%26e/$LABEL.missing");
    }

    #[test]
    fn test_env_placeholders() {
        let env = [
            ("DT_TENANT".to_string(), "abc.live".to_string()),
            ("DT".to_string(), "x".to_string()),
            ("GREETING".to_string(), "hello world".to_string()),
        ];
        let out =
            replace_placeholders_with_env("$ENV.DT_TENANT $ENV.DT $ENV.GREETING", &event(), env);
        assert_eq!(out, "abc.live x hello%20world");
    }

    #[cfg(unix)]
    #[test]
    fn test_env_with_non_utf8_entries() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let env = vec![
            (OsString::from("BROKEN"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from("DT_TENANT"), OsString::from("abc.live")),
        ];
        let out = replace_placeholders_with_env(
            "$ENV.DT_TENANT/$ENV.BROKEN",
            &event(),
            shared::env::utf8_pairs(env),
        );
        assert_eq!(out, "abc.live/$ENV.BROKEN");
    }

    #[test]
    fn test_escaping_keeps_unreserved_characters() {
        assert_eq!(escape("a~b*c+d e"), "a~b%2Ac%2Bd%20e");
        assert_eq!(escape("v1.0_rc-2"), "v1.0_rc-2");
        assert_eq!(escape("ä!'()"), "%C3%A4%21%27%28%29");
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(replace_placeholders_with_env("dynatrace", &event(), []), "dynatrace");
        assert_eq!(replace_placeholders_with_env("", &event(), []), "");
    }
}
