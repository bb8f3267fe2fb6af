//! Turning responses into output: dig-like text, or JSON, XML or YAML.

use plummet_proto::Message;
use tracing::info;

use crate::error::RenderError;
use crate::net::Response;
use crate::options::{Options, OutputFormat};

pub mod structured;
pub mod text;

/// Renders a response in the output format selected in `opts`.
pub fn render(res: &Response, opts: &Options) -> Result<String, RenderError> {
    match opts.format {
        OutputFormat::Text => text::to_string(res, opts),
        format => {
            info!("Printing as {:?}.", format);
            let stats = opts
                .display
                .statistics
                .then(|| structured::Statistics::new(res, opts))
                .transpose()?;
            structured::to_string(&res.message, stats, opts)
        }
    }
}

/// Renders a query that is about to be sent. Statistics are never shown; text output instead
/// ends with the size of the query.
pub fn render_query(query: &Message, opts: &Options) -> Result<String, RenderError> {
    if opts.format != OutputFormat::Text {
        return Ok(structured::to_string(query, None, opts)? + "\n");
    }

    let mut opts = opts.clone();
    opts.display.statistics = false;
    let res = Response {
        message: query.clone(),
        rtt: Default::default(),
    };
    let size = query.wire_len().map_err(RenderError::Size)?;
    Ok(format!(
        "{}\n;; QUERY SIZE: {}\n\n",
        text::to_string(&res, &opts)?,
        size
    ))
}

/// A TTL the way Go formats durations: `1h0m0s`, `5m0s`, `30s`.
pub fn human_ttl(secs: u32) -> String {
    let (hours, mins, secs) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m{}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Converts punycode labels of `name` to Unicode. Names without punycode labels are returned
/// unchanged.
pub fn to_unicode(name: &str) -> Result<String, RenderError> {
    if !name.to_ascii_lowercase().contains("xn--") {
        return Ok(name.to_string());
    }
    let (unicode, res) = idna::domain_to_unicode(name);
    res.map_err(|e| RenderError::Idna {
        name: name.to_string(),
        reason: format!("{:?}", e),
    })?;
    Ok(unicode)
}

#[cfg(test)]
mod tests {
    use super::{human_ttl, to_unicode};

    #[test]
    fn human_ttls() {
        assert_eq!(human_ttl(0), "0s");
        assert_eq!(human_ttl(30), "30s");
        assert_eq!(human_ttl(300), "5m0s");
        assert_eq!(human_ttl(3600), "1h0m0s");
        assert_eq!(human_ttl(86461), "24h1m1s");
    }

    #[test]
    fn punycode_is_translated() {
        assert_eq!(to_unicode("xn--bcher-kva.example.").unwrap(), "bücher.example.");
        assert_eq!(to_unicode("example.com.").unwrap(), "example.com.");
        assert_eq!(to_unicode(".").unwrap(), ".");
    }
}
