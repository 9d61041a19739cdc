//! Script wrapping - turns caller source into a self-contained document
//!
//! The untrusted script is pasted verbatim inside an inline `<script>`
//! element, so anything that could end that element early is removed
//! first. This is a textual defence against breakout, not an HTML parser:
//! it covers `</` and `/>` and nothing else. Script-data states such as
//! `<!--` are not handled here.
//!
//! The wrapped body runs in an `async` function. Whatever it returns (a
//! plain value or something awaited) becomes the success value, whatever
//! it throws becomes the failure. Exactly one message is posted to the
//! embedding context either way.

use std::borrow::Cow;

/// Marker carried by every outcome message
pub const CHANNEL_TAG: &str = "veil";

/// Opening of an end tag
const END_TAG_OPEN: &str = "</";
/// Self-closing tag marker
const SELF_CLOSING: &str = "/>";

const DOCUMENT_HEAD: &str = "<!DOCTYPE html>\n\
<html>\n\
<head>\n\
<meta charset=\"utf-8\">\n\
</head>\n\
<body>\n";

const DOCUMENT_TAIL: &str = "</body>\n</html>\n";

const PAYLOAD_PRELUDE: &str = r#"<script>
(function (host) {
  var post = host.postMessage.bind(host);
  function describe(error) {
    try {
      return {
        name: error && error.name ? String(error.name) : "Error",
        message: error && error.message !== undefined ? String(error.message) : String(error)
      };
    } catch (describeError) {
      return { name: "Error", message: "<unserializable error>" };
    }
  }
  function settle(message) {
    try {
      post(message, "*");
    } catch (cloneError) {
      post({ channel: "veil", status: "failure", error: describe(cloneError) }, "*");
    }
  }
  (async function () {
"#;

const PAYLOAD_EPILOGUE: &str = r#"
  })().then(function (value) {
    settle(value === undefined
      ? { channel: "veil", status: "success" }
      : { channel: "veil", status: "success", value: value });
  }, function (error) {
    settle({ channel: "veil", status: "failure", error: describe(error) });
  });
})(window.parent);
</script>
"#;

fn contains_breakout(text: &str) -> bool {
    text.contains(END_TAG_OPEN) || text.contains(SELF_CLOSING)
}

/// Strip every `</` and `/>` from `script`.
///
/// Repeats until none are left, so a removal can't splice a new sequence
/// together (`<<//` would otherwise leave `</` behind).
pub fn sanitize(script: &str) -> Cow<'_, str> {
    if !contains_breakout(script) {
        return Cow::Borrowed(script);
    }

    let mut cleaned = script.to_string();
    while contains_breakout(&cleaned) {
        cleaned = cleaned.replace(END_TAG_OPEN, "").replace(SELF_CLOSING, "");
    }
    tracing::debug!(
        removed = script.len() - cleaned.len(),
        "stripped tag sequences from script"
    );
    Cow::Owned(cleaned)
}

/// Escape a value for a double-quoted HTML attribute
fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '"', '<', '>']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    Cow::Owned(escaped)
}

/// Build the document loaded into the container.
///
/// One `<script src>` per dependency, in order, then the wrapped payload.
/// Pure: the same inputs always give the same bytes.
pub fn build<S: AsRef<str>>(script: &str, dependencies: &[S]) -> String {
    let body = sanitize(script);

    let mut document = String::with_capacity(
        DOCUMENT_HEAD.len() + PAYLOAD_PRELUDE.len() + body.len() + PAYLOAD_EPILOGUE.len() + 64,
    );
    document.push_str(DOCUMENT_HEAD);

    for dependency in dependencies {
        document.push_str("<script src=\"");
        document.push_str(&escape_attribute(dependency.as_ref()));
        document.push_str("\"></script>\n");
    }

    document.push_str(PAYLOAD_PRELUDE);
    document.push_str(&body);
    document.push_str(PAYLOAD_EPILOGUE);
    document.push_str(DOCUMENT_TAIL);
    document
}
