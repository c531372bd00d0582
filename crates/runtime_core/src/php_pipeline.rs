//! Request to `$_SERVER` / `$_GET` / `$_POST` translation.
//!
//! Everything here is a pure string transformation: the same descriptor,
//! config and request time always yield the same program text.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Config, ConfigValue};
use crate::request::RequestDescriptor;

pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
/// Requests never come from a real socket.
pub const REMOTE_ADDR: &str = "127.0.0.1";
pub const HEADER_PREFIX: &str = "HTTP_";

/// Where the request lands inside the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTarget {
    pub filename: String,
    /// Full request path, only set when a front controller handles it.
    pub path_info: Option<String>,
}

/// Parse `Name: value; Other: value`. Segments without a colon are dropped;
/// a repeated name keeps the last value.
pub fn parse_headers(raw: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for segment in raw.split(';') {
        let Some((name, value)) = segment.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    headers
}

/// Split `path?query` on the first `?`.
pub fn split_target(target: &str) -> (&str, &str) {
    target.split_once('?').unwrap_or((target, ""))
}

/// Decode `application/x-www-form-urlencoded` pairs in order.
pub fn parse_params(encoded: &str) -> Vec<(String, String)> {
    encoded
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned(),
    }
}

/// Escape text for a single-quoted PHP literal.
pub fn escape_php_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn quoted(value: &str) -> String {
    format!("'{}'", escape_php_string(value))
}

/// `Content-Type` -> `HTTP_CONTENT_TYPE`.
pub fn header_server_key(name: &str) -> String {
    let mut key = String::with_capacity(HEADER_PREFIX.len() + name.len());
    key.push_str(HEADER_PREFIX);
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            key.push(ch.to_ascii_uppercase());
        } else {
            key.push('_');
        }
    }
    key
}

fn config_literal(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Bool(true) => "true".to_string(),
        ConfigValue::Bool(false) => "false".to_string(),
        ConfigValue::Int(value) => value.to_string(),
        ConfigValue::Float(value) if value.is_nan() => "NAN".to_string(),
        ConfigValue::Float(value) if value.is_infinite() && *value > 0.0 => "INF".to_string(),
        ConfigValue::Float(value) if value.is_infinite() => "-INF".to_string(),
        ConfigValue::Float(value) => value.to_string(),
        ConfigValue::Str(value) => quoted(value),
    }
}

fn assign(php: &mut String, array: &str, key: &str, literal: &str) {
    php.push_str(&format!("${}[{}] = {};\n", array, quoted(key), literal));
}

fn assign_server(php: &mut String, key: &str, value: &str) {
    assign(php, "_SERVER", key, &quoted(value));
}

fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn join_root(root: &str, path: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub fn resolve_script(path: &str, config: &Config) -> ScriptTarget {
    let root = config.document_root();
    match config.entry_point() {
        Some(entry) => {
            let filename = if entry.starts_with('/') {
                entry
            } else {
                join_root(&root, &entry)
            };
            ScriptTarget {
                filename,
                path_info: Some(path.to_string()),
            }
        }
        None => {
            let mut filename = join_root(&root, path);
            if filename.ends_with('/') {
                filename.push_str("index.php");
            }
            ScriptTarget {
                filename,
                path_info: None,
            }
        }
    }
}

/// Variable assignments describing `request`, in a fixed order:
/// server block, headers, config, then request parameters.
pub fn build_execution_preamble(
    request: &RequestDescriptor,
    config: &Config,
    request_time: u64,
) -> String {
    let method = request.normalized_method();
    let headers = parse_headers(&request.headers);
    let (path, query) = split_target(&request.target);
    let path = if path.is_empty() { "/" } else { path };
    let body = request.body.as_deref().unwrap_or("");
    let content_type = header_value(&headers, "Content-Type").unwrap_or(DEFAULT_CONTENT_TYPE);

    let mut php = String::new();
    assign_server(&mut php, "REMOTE_ADDR", REMOTE_ADDR);
    assign_server(&mut php, "REQUEST_TIME", &request_time.to_string());
    assign_server(&mut php, "CONTENT_TYPE", content_type);
    assign_server(&mut php, "CONTENT_LENGTH", &body.len().to_string());
    assign_server(&mut php, "REQUEST_METHOD", &method);
    assign_server(&mut php, "REQUEST_URI", path);
    assign_server(&mut php, "QUERY_STRING", query);

    let script = resolve_script(path, config);
    assign_server(&mut php, "SCRIPT_FILENAME", &script.filename);
    if let Some(path_info) = &script.path_info {
        assign_server(&mut php, "PATH_INFO", path_info);
    }

    for (name, value) in &headers {
        assign_server(&mut php, &header_server_key(name), value);
    }

    for (key, value) in config.iter() {
        assign(&mut php, "_SERVER", key, &config_literal(value));
    }

    match method.as_str() {
        "GET" => {
            for (key, value) in parse_params(query) {
                assign(&mut php, "_GET", &key, &quoted(&value));
            }
        }
        "POST" => {
            for (key, value) in parse_params(body) {
                assign(&mut php, "_POST", &key, &quoted(&value));
            }
        }
        other => {
            php.push_str(&format!(
                "trigger_error({}, E_USER_ERROR);\n",
                quoted(&format!("Unsupported request method: {}", other))
            ));
        }
    }

    php
}

/// Full program for a request task: preamble, then the resolved script.
pub fn build_request_program(
    request: &RequestDescriptor,
    config: &Config,
    request_time: u64,
) -> String {
    format!(
        "<?php {} include_once($_SERVER['SCRIPT_FILENAME']);",
        build_execution_preamble(request, config, request_time)
    )
}

/// Wall-clock seconds for `REQUEST_TIME`.
pub fn request_time_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;

    /// Every line must be a complete statement with all single-quoted
    /// literals closed.
    fn assert_well_formed(php: &str) {
        for line in php.lines() {
            let mut in_string = false;
            let mut chars = line.chars();
            while let Some(ch) = chars.next() {
                match (in_string, ch) {
                    (false, '\'') => in_string = true,
                    (true, '\\') => {
                        chars.next();
                    }
                    (true, '\'') => in_string = false,
                    _ => {}
                }
            }
            assert!(!in_string, "unterminated literal in: {}", line);
            assert!(line.ends_with(';'), "statement not terminated: {}", line);
        }
    }

    #[test]
    fn get_request_binds_query_and_script() {
        let request = RequestDescriptor::get("/index.php?name=Ada").with_headers("Content-Type: text/html");
        let php = build_execution_preamble(&request, &Config::defaults(), 1_700_000_000);

        assert!(php.contains("$_GET['name'] = 'Ada';\n"));
        assert!(php.contains("$_SERVER['SCRIPT_FILENAME'] = '/www/index.php';\n"));
        assert!(php.contains("$_SERVER['CONTENT_TYPE'] = 'text/html';\n"));
        assert!(php.contains("$_SERVER['HTTP_CONTENT_TYPE'] = 'text/html';\n"));
        assert!(php.contains("$_SERVER['REQUEST_URI'] = '/index.php';\n"));
        assert!(php.contains("$_SERVER['QUERY_STRING'] = 'name=Ada';\n"));
        assert!(php.contains("$_SERVER['REQUEST_TIME'] = '1700000000';\n"));
        assert!(php.contains("$_SERVER['REMOTE_ADDR'] = '127.0.0.1';\n"));
        assert!(!php.contains("PATH_INFO"));
        assert_well_formed(&php);
    }

    #[test]
    fn output_is_deterministic() {
        let request = RequestDescriptor::post("/submit", "b=2&a=1").with_headers("X-B: 2; X-A: 1");
        let config = Config::defaults();
        assert_eq!(
            build_execution_preamble(&request, &config, 5),
            build_execution_preamble(&request, &config, 5)
        );
    }

    #[test]
    fn header_string_parsing() {
        let headers = parse_headers(" Accept : text/plain ;; garbage ; Host: example.com:8080 ;: empty");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["Accept"], "text/plain");
        assert_eq!(headers["Host"], "example.com:8080");
    }

    #[test]
    fn header_keys_are_sanitized() {
        assert_eq!(header_server_key("x-request-id"), "HTTP_X_REQUEST_ID");
        assert_eq!(header_server_key("Accept.Lang uage"), "HTTP_ACCEPT_LANG_UAGE");
    }

    #[test]
    fn content_type_defaults_to_form_encoding() {
        let request = RequestDescriptor::post("/login", "user=ada&pass=x%27y");
        let php = build_execution_preamble(&request, &Config::defaults(), 0);
        assert!(php.contains(&format!("$_SERVER['CONTENT_TYPE'] = '{}';", DEFAULT_CONTENT_TYPE)));
        assert!(php.contains("$_SERVER['CONTENT_LENGTH'] = '19';"));
        assert!(php.contains("$_POST['user'] = 'ada';"));
        assert!(php.contains("$_POST['pass'] = 'x\\'y';"));
        assert!(!php.contains("$_GET"));
        assert_well_formed(&php);
    }

    #[test]
    fn content_length_counts_bytes() {
        let request = RequestDescriptor::post("/", "é=ü");
        let php = build_execution_preamble(&request, &Config::defaults(), 0);
        assert!(php.contains("$_SERVER['CONTENT_LENGTH'] = '5';"));
    }

    #[test]
    fn other_methods_get_a_fatal_directive() {
        let request = RequestDescriptor::new("delete", "/items/1?force=1");
        let php = build_execution_preamble(&request, &Config::defaults(), 0);
        assert!(php.contains("trigger_error('Unsupported request method: DELETE', E_USER_ERROR);"));
        assert!(!php.contains("$_GET"));
        assert!(!php.contains("$_POST"));
    }

    #[test]
    fn entry_point_takes_over_script_path() {
        let config = Config::defaults().with(keys::ENTRY_POINT, "php/public/index.php");
        let php = build_execution_preamble(&RequestDescriptor::get("/api/posts?page=2"), &config, 0);
        assert!(php.contains("$_SERVER['SCRIPT_FILENAME'] = '/www/php/public/index.php';"));
        assert!(php.contains("$_SERVER['PATH_INFO'] = '/api/posts';"));
        assert!(php.contains("$_GET['page'] = '2';"));

        let config = Config::defaults().with(keys::ENTRY_POINT, "/srv/front.php");
        assert_eq!(resolve_script("/x", &config).filename, "/srv/front.php");
    }

    #[test]
    fn directory_paths_resolve_to_index() {
        let config = Config::defaults().with(keys::DOCUMENT_ROOT, "/app/");
        assert_eq!(resolve_script("/", &config).filename, "/app/index.php");
        assert_eq!(resolve_script("/blog/", &config).filename, "/app/blog/index.php");
        let php = build_execution_preamble(&RequestDescriptor::get(""), &config, 0);
        assert!(php.contains("$_SERVER['REQUEST_URI'] = '/';"));
    }

    #[test]
    fn config_values_are_typed() {
        let config = Config::new()
            .with("FLAG", true)
            .with("COUNT", 3i64)
            .with("RATIO", 0.5)
            .with("NAME", "O'Brien");
        let php = build_execution_preamble(&RequestDescriptor::get("/"), &config, 0);
        assert!(php.contains("$_SERVER['FLAG'] = true;"));
        assert!(php.contains("$_SERVER['COUNT'] = 3;"));
        assert!(php.contains("$_SERVER['RATIO'] = 0.5;"));
        assert!(php.contains("$_SERVER['NAME'] = 'O\\'Brien';"));
    }

    #[test]
    fn query_values_are_url_decoded() {
        let params = parse_params("q=a+b%20c&empty=&flag&&x=%E2%9C%93&bad=%zz");
        assert_eq!(
            params,
            vec![
                ("q".to_string(), "a b c".to_string()),
                ("empty".to_string(), String::new()),
                ("flag".to_string(), String::new()),
                ("x".to_string(), "✓".to_string()),
                ("bad".to_string(), "%zz".to_string()),
            ]
        );
    }

    #[test]
    fn hostile_strings_stay_inside_their_literals() {
        let hostile = [
            "'",
            "\\",
            "\\'",
            "abc\\",
            "'; system('id'); '",
            "\\\\'",
            "it's",
            "''''",
        ];
        for value in hostile {
            let encoded = urlencoding::encode(value);
            let request = RequestDescriptor::get(format!("/p.php?{}={}", encoded, encoded))
                .with_headers(format!("X-Evil: {}", value));
            let config = Config::defaults().with(value, value);
            let php = build_execution_preamble(&request, &config, 0);
            assert_well_formed(&php);

            let request = RequestDescriptor::post(format!("/{}", value), format!("k={}", encoded));
            assert_well_formed(&build_execution_preamble(&request, &config, 0));
        }
    }

    #[test]
    fn escaping_round_trip_shape() {
        assert_eq!(escape_php_string("it's"), "it\\'s");
        assert_eq!(escape_php_string("C:\\dir"), "C:\\\\dir");
    }

    #[test]
    fn request_program_wraps_preamble() {
        let program = build_request_program(&RequestDescriptor::get("/index.php"), &Config::defaults(), 0);
        assert!(program.starts_with("<?php $_SERVER['REMOTE_ADDR']"));
        assert!(program.ends_with("include_once($_SERVER['SCRIPT_FILENAME']);"));
    }
}
