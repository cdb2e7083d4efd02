//! Email parsing: route from the subject, clients and product lines from
//! the body.
//!
//! The body grammar is deliberately small: a top-to-bottom scan with a
//! single open client. Anything that does not fit becomes a diagnostic
//! instead of killing the lote; only a client without a name is a hard
//! error.

use comanda_common::normalize::normalize;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static CLIENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^Cliente:\s*(.*)$").expect("client regex"));
static OBSERVATIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^Observaciones:\s*(.*)$").expect("observations regex"));
static PRODUCT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]+(?:[.,][0-9]+)?)\s+([^-]+?)\s*-\s*(.+?)\s*-\s*([0-9]+(?:[.,][0-9]+)?)$",
    )
    .expect("product regex")
});
static SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-=_*]{3,}$").expect("separator regex"));

#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub quantity: f64,
    pub unit: String,
    pub product: String,
    pub price: f64,
    pub line_no: usize,
}

#[derive(Debug, Clone)]
pub struct ParsedClient {
    pub name: String,
    pub observations: Option<String>,
    pub lines: Vec<ParsedLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub line_no: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ParsedBody {
    pub clients: Vec<ParsedClient>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedBody {
    /// Successful iff at least one client was emitted and no hard error
    /// occurred
    pub fn is_success(&self) -> bool {
        !self.clients.is_empty()
            && !self
                .diagnostics
                .iter()
                .any(|d| d.level == DiagnosticLevel::Error)
    }
}

/// Normalized subject key used for the routes-catalog lookup
pub fn subject_route_key(subject: &str) -> String {
    normalize(subject)
}

/// Decimal with comma or dot separator; the pattern guarantees the shape
fn parse_decimal(raw: &str) -> f64 {
    raw.replace(',', ".").parse().unwrap_or(0.0)
}

/// Parse the body into clients, product lines and diagnostics
pub fn parse_body(body: &str) -> ParsedBody {
    let mut clients: Vec<ParsedClient> = Vec::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut current: Option<ParsedClient> = None;
    // Observations bind only while nothing else followed the client line.
    let mut expecting_observations = false;

    let mut flush =
        |current: &mut Option<ParsedClient>, diagnostics: &mut Vec<Diagnostic>| {
            if let Some(client) = current.take() {
                if client.lines.is_empty() {
                    diagnostics.push(Diagnostic {
                        level: DiagnosticLevel::Warning,
                        message: format!("client without products: {}", client.name),
                        line_no: None,
                    });
                }
                clients.push(client);
            }
        };

    for (idx, raw_line) in body.split(['\r', '\n']).enumerate() {
        let line = raw_line.trim();
        let line_no = idx + 1;

        if line.is_empty() || SEPARATOR_RE.is_match(line) {
            continue;
        }

        if let Some(caps) = CLIENT_RE.captures(line) {
            let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if name.is_empty() {
                diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Error,
                    message: "client without name".to_string(),
                    line_no: Some(line_no),
                });
                continue;
            }
            flush(&mut current, &mut diagnostics);
            current = Some(ParsedClient {
                name: name.to_string(),
                observations: None,
                lines: Vec::new(),
            });
            expecting_observations = true;
            continue;
        }

        if expecting_observations {
            if let Some(caps) = OBSERVATIONS_RE.captures(line) {
                if let Some(client) = current.as_mut() {
                    let text = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                    client.observations =
                        (!text.is_empty()).then(|| text.to_string());
                    expecting_observations = false;
                    continue;
                }
            }
        }

        if let Some(caps) = PRODUCT_RE.captures(line) {
            expecting_observations = false;
            let parsed = ParsedLine {
                quantity: parse_decimal(&caps[1]),
                unit: caps[2].trim().to_string(),
                product: caps[3].trim().to_string(),
                price: parse_decimal(&caps[4]),
                line_no,
            };
            match current.as_mut() {
                Some(client) => client.lines.push(parsed),
                None => diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Warning,
                    message: "product line with no client".to_string(),
                    line_no: Some(line_no),
                }),
            }
            continue;
        }

        if current.is_some() {
            expecting_observations = false;
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warning,
                message: format!("misformatted line: {}", line),
                line_no: Some(line_no),
            });
        }
        // Text before any client (greetings, signatures) is ignored.
    }

    flush(&mut current, &mut diagnostics);

    ParsedBody {
        clients,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_client_single_line() {
        let body = "Cliente: Super Uno\n1 L - Leche - 1.20";
        let parsed = parse_body(body);
        assert!(parsed.is_success());
        assert_eq!(parsed.clients.len(), 1);
        let client = &parsed.clients[0];
        assert_eq!(client.name, "Super Uno");
        assert_eq!(client.lines.len(), 1);
        let line = &client.lines[0];
        assert_eq!(line.quantity, 1.0);
        assert_eq!(line.unit, "L");
        assert_eq!(line.product, "Leche");
        assert_eq!(line.price, 1.20);
    }

    #[test]
    fn test_observations_attach_to_opening_client() {
        let body = "Cliente: Super Uno\nObservaciones: entregar temprano\n2 kg - Queso - 8,50";
        let parsed = parse_body(body);
        assert_eq!(
            parsed.clients[0].observations.as_deref(),
            Some("entregar temprano")
        );
        assert_eq!(parsed.clients[0].lines[0].price, 8.50);
    }

    #[test]
    fn test_observations_do_not_bind_after_products() {
        let body = "Cliente: Super Uno\n1 L - Leche - 1.20\nObservaciones: tarde";
        let parsed = parse_body(body);
        assert_eq!(parsed.clients[0].observations, None);
        // The stray line is a warning, not an error.
        assert!(parsed.is_success());
        assert!(parsed
            .diagnostics
            .iter()
            .any(|d| d.message.starts_with("misformatted line")));
    }

    #[test]
    fn test_comma_decimals() {
        let body = "Cliente: Super Uno\n0,5 kg - Jamon - 12,75";
        let parsed = parse_body(body);
        let line = &parsed.clients[0].lines[0];
        assert_eq!(line.quantity, 0.5);
        assert_eq!(line.price, 12.75);
    }

    #[test]
    fn test_product_name_with_dash() {
        let body = "Cliente: Super Uno\n1 ud - Coca-Cola Zero - 1.10";
        let parsed = parse_body(body);
        assert_eq!(parsed.clients[0].lines[0].product, "Coca-Cola Zero");
        assert_eq!(parsed.clients[0].lines[0].price, 1.10);
    }

    #[test]
    fn test_client_without_name_is_hard_error() {
        let body = "Cliente:\n1 L - Leche - 1.20";
        let parsed = parse_body(body);
        assert!(!parsed.is_success());
        assert!(parsed
            .diagnostics
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error && d.message == "client without name"));
    }

    #[test]
    fn test_product_line_before_any_client_is_warning() {
        let body = "1 L - Leche - 1.20\nCliente: Super Uno\n2 L - Leche - 1.20";
        let parsed = parse_body(body);
        assert!(parsed.is_success());
        assert_eq!(parsed.clients[0].lines.len(), 1);
        assert!(parsed
            .diagnostics
            .iter()
            .any(|d| d.message == "product line with no client"));
    }

    #[test]
    fn test_client_with_zero_lines_is_retained_with_warning() {
        let body = "Cliente: Vacio\nCliente: Lleno\n1 L - Leche - 1.20";
        let parsed = parse_body(body);
        assert_eq!(parsed.clients.len(), 2);
        assert_eq!(parsed.clients[0].name, "Vacio");
        assert!(parsed.clients[0].lines.is_empty());
        assert!(parsed
            .diagnostics
            .iter()
            .any(|d| d.message.starts_with("client without products")));
    }

    #[test]
    fn test_separators_and_blanks_ignored() {
        let body = "Cliente: Super Uno\n-----\n\n1 L - Leche - 1.20\n=====";
        let parsed = parse_body(body);
        assert!(parsed.is_success());
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_empty_body_is_failure() {
        let parsed = parse_body("");
        assert!(!parsed.is_success());
        assert!(parsed.clients.is_empty());
    }

    #[test]
    fn test_subject_route_key_normalizes() {
        assert_eq!(subject_route_key("Ruta Norte"), "RUTA NORTE");
        assert_eq!(subject_route_key("  RUTA   SUR  "), "RUTA SUR");
    }
}
