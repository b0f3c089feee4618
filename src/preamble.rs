//! Rewrites guest markup before instantiation: embeds the synthesized
//! security policy and the scroll-boundary forwarder script.

use html_escape::encode_double_quoted_attribute;

use crate::policy::{synthesize, PolicyGrant};
use crate::protocol::METHOD_SANDBOX_WHEEL;

/// Wheel forwarder installed ahead of any guest script. Samples the
/// scrollable-ancestor chain of each wheel event and posts it to the host,
/// which decides whether the event should continue scrolling the outer page.
const WHEEL_FORWARDER: &str = r#"(function () {
  function metrics(el) {
    return {
      scrollTop: el.scrollTop || 0,
      scrollHeight: el.scrollHeight || 0,
      clientHeight: el.clientHeight || 0
    };
  }
  window.addEventListener('wheel', function (event) {
    var ancestors = [];
    var node = event.target;
    while (node && node !== document.documentElement && node !== document.body) {
      if (node.nodeType === 1) {
        var overflow = getComputedStyle(node).overflowY || 'visible';
        var sample = metrics(node);
        sample.overflow = overflow;
        ancestors.push(sample);
      }
      node = node.parentNode;
    }
    var doc = metrics(document.documentElement);
    window.parent.postMessage({
      jsonrpc: '2.0',
      method: 'ui/notifications/sandbox-wheel',
      params: {
        deltaX: event.deltaX,
        deltaY: event.deltaY,
        ancestors: ancestors,
        document: doc
      }
    }, '*');
  }, { passive: true });
})();"#;

/// Insert the policy declaration and the wheel forwarder as early as possible
/// in the document head. Never fails: markup without a head gets one
/// synthesized after the root tag, and markup with no structural tags at all
/// is wrapped in a minimal document shell.
pub fn inject(markup: &str, grant: &PolicyGrant) -> String {
    let preamble = build_preamble(grant);

    if let Some(position) = opening_tag_end(markup, "head") {
        return splice(markup, position, &preamble);
    }
    if let Some(position) = opening_tag_end(markup, "html") {
        let wrapped = format!("<head>{preamble}</head>");
        return splice(markup, position, &wrapped);
    }

    format!(
        "<!DOCTYPE html><html><head>{preamble}</head><body>{markup}</body></html>"
    )
}

fn build_preamble(grant: &PolicyGrant) -> String {
    let policy = synthesize(grant);
    let content = encode_double_quoted_attribute(&policy);
    format!(
        "<meta http-equiv=\"Content-Security-Policy\" content=\"{content}\">\
         <script>{WHEEL_FORWARDER}</script>"
    )
}

fn splice(markup: &str, position: usize, insert: &str) -> String {
    let mut output = String::with_capacity(markup.len() + insert.len());
    output.push_str(&markup[..position]);
    output.push_str(insert);
    output.push_str(&markup[position..]);
    output
}

/// Byte offset just past the `>` of the first opening `<tag ...>` match,
/// case-insensitive. Guards the tag-name boundary so `<head>` does not match
/// `<header>`. Returns `None` for unterminated tags as well, so callers
/// degrade to a safer wrapping instead of splicing mid-tag.
fn opening_tag_end(markup: &str, tag: &str) -> Option<usize> {
    let lower = markup.to_ascii_lowercase();
    let needle = format!("<{tag}");
    let mut search_from = 0;

    while let Some(found) = lower[search_from..].find(&needle) {
        let start = search_from + found;
        let after_name = start + needle.len();
        let boundary = lower[after_name..].chars().next();
        match boundary {
            Some(c) if c == '>' || c.is_ascii_whitespace() || c == '/' => {
                let close = lower[after_name..].find('>')?;
                return Some(after_name + close + 1);
            }
            _ => search_from = after_name,
        }
    }
    None
}
