use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use runtime::RequestDescriptor;

use super::{GlobalArgs, Settings, start};

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Path and query, e.g. `/index.php?name=Ada`
    pub target: String,

    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request body; `@file` reads it from a file
    #[arg(long)]
    pub body: Option<String>,

    /// `Name: value` header, repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,
}

impl RequestArgs {
    fn descriptor(&self) -> Result<RequestDescriptor> {
        let mut request =
            RequestDescriptor::new(&self.method, &self.target).with_headers(self.headers.join(";"));
        if let Some(body) = &self.body {
            let body = match body.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("reading request body from {}", path))?,
                None => body.clone(),
            };
            request = request.with_body(body);
        }
        Ok(request)
    }
}

pub async fn cmd(global: &GlobalArgs, args: RequestArgs) -> Result<()> {
    let request = args.descriptor()?;
    let settings = Settings::load(global)?;
    let (runtime, _) = start(global, &settings).await?;
    stdio::debug(
        "request",
        &format!("{} {}", request.normalized_method(), request.target),
    );
    let result = match args.timeout {
        Some(ms) => {
            runtime
                .run_request_with_timeout(request, Duration::from_millis(ms))
                .await
        }
        None => runtime.run_request(request).await,
    };
    runtime.shutdown().await;

    print!("{}", result?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(body: Option<&str>, headers: &[&str]) -> RequestArgs {
        RequestArgs {
            target: "/form.php".to_string(),
            method: "post".to_string(),
            body: body.map(str::to_string),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            timeout: None,
        }
    }

    #[test]
    fn headers_are_joined_for_the_translator() {
        let request = args(Some("a=1"), &["Content-Type: application/x-www-form-urlencoded", "X-Id: 7"])
            .descriptor()
            .unwrap();
        assert_eq!(request.normalized_method(), "POST");
        assert_eq!(
            request.headers,
            "Content-Type: application/x-www-form-urlencoded;X-Id: 7"
        );
        assert_eq!(request.body.as_deref(), Some("a=1"));
    }

    #[test]
    fn body_can_come_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.json");
        std::fs::write(&path, "{\"name\":\"Ada\"}").unwrap();
        let request = args(Some(&format!("@{}", path.display())), &[])
            .descriptor()
            .unwrap();
        assert_eq!(request.body.as_deref(), Some("{\"name\":\"Ada\"}"));
    }
}
