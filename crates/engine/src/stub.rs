//! A scripted engine for tests and demos.
//!
//! Programs are lines of `command argument`:
//!
//! | line | effect |
//! |---|---|
//! | `output 2+2` | integer sums are evaluated, anything else is echoed |
//! | `error text` | `text` on the error stream |
//! | `throw message` | uncaught failure |
//! | `sleep 250` | wait 250ms |
//! | `write /path text` | write a file |
//! | `cat /path` | file contents on the output stream |
//! | `set name value` / `get name` | global scope, cleared by `reset` |
//!
//! A program starting with `<?php` is echoed verbatim instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::EngineError;
use crate::events::{EventStream, Stream};
use crate::fs::{FileSystem, SyncDirection};
use crate::memory_fs::MemoryFs;
use crate::{BootOptions, Engine, EngineFactory};

#[derive(Debug, Default, Clone)]
pub struct StubEngineFactory {
    boots: Arc<AtomicUsize>,
    fail_with: Option<String>,
}

impl StubEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose every boot fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            boots: Arc::default(),
            fail_with: Some(message.into()),
        }
    }

    /// Successful boots so far, across clones.
    pub fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl EngineFactory for StubEngineFactory {
    async fn boot(&self, image: Bytes, options: BootOptions) -> Result<Box<dyn Engine>, EngineError> {
        if let Some(message) = &self.fail_with {
            return Err(EngineError::Boot(message.clone()));
        }
        if image.is_empty() {
            return Err(EngineError::Boot("binary image is empty".to_string()));
        }
        let fs = match options.persist {
            Some(namespace) => MemoryFs::persistent(options.mount.clone(), namespace),
            None => MemoryFs::new(),
        };
        fs.sync(SyncDirection::Load)?;
        fs.create_dir_all(&options.mount)?;
        self.boots.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubEngine::new(fs)))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[derive(Debug, Default)]
pub struct StubEngine {
    fs: MemoryFs,
    events: EventStream,
    globals: HashMap<String, String>,
}

impl StubEngine {
    pub fn new(fs: MemoryFs) -> Self {
        Self {
            fs,
            events: EventStream::new(),
            globals: HashMap::new(),
        }
    }

    async fn run_line(&mut self, line: &str) -> Result<(), EngineError> {
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "output" => self.events.emit(Stream::Output, &evaluate(rest)),
            "error" => self.events.emit(Stream::Error, rest),
            "throw" => return Err(EngineError::Execution(rest.to_string())),
            "sleep" => {
                let ms = rest
                    .parse::<u64>()
                    .map_err(|_| EngineError::Execution(format!("bad sleep duration '{}'", rest)))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "write" => {
                let (path, text) = rest.split_once(' ').unwrap_or((rest, ""));
                self.fs.write_file(path, text.as_bytes())?;
            }
            "cat" => {
                let data = self.fs.read_file(rest)?;
                self.events.emit(Stream::Output, &String::from_utf8_lossy(&data));
            }
            "set" => {
                let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
                self.globals.insert(name.to_string(), value.to_string());
            }
            "get" => {
                let value = self.globals.get(rest).map(String::as_str).unwrap_or("null");
                self.events.emit(Stream::Output, value);
            }
            other => {
                return Err(EngineError::Execution(format!(
                    "syntax error, unexpected '{}'",
                    other
                )));
            }
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Engine for StubEngine {
    async fn reset(&mut self) -> Result<(), EngineError> {
        self.globals.clear();
        Ok(())
    }

    async fn run(&mut self, code: &str) -> Result<(), EngineError> {
        if code.trim_start().starts_with("<?php") {
            self.events.emit(Stream::Output, code);
            return Ok(());
        }
        for line in code.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.run_line(line).await?;
        }
        Ok(())
    }

    fn fs(&self) -> &dyn FileSystem {
        &self.fs
    }

    fn events(&self) -> &EventStream {
        &self.events
    }
}

/// `2+2` → `4`; anything that is not an integer sum comes back unchanged.
fn evaluate(expr: &str) -> String {
    let mut total: i64 = 0;
    for term in expr.split('+') {
        let Ok(value) = term.trim().parse::<i64>() else {
            return expr.to_string();
        };
        match total.checked_add(value) {
            Some(sum) => total = sum,
            None => return expr.to_string(),
        }
    }
    total.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use store::Store;

    async fn capture(engine: &mut Box<dyn Engine>, code: &str) -> (String, Result<(), EngineError>) {
        let out = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&out);
        let id = engine.events().subscribe(move |_, chunk| sink.borrow_mut().push_str(chunk));
        let result = engine.run(code).await;
        engine.events().unsubscribe(id);
        let text = out.borrow().clone();
        (text, result)
    }

    async fn boot() -> Box<dyn Engine> {
        StubEngineFactory::new()
            .boot(Bytes::from_static(b"stub"), BootOptions::new("/www"))
            .await
            .unwrap()
    }

    #[test]
    fn evaluates_integer_sums() {
        assert_eq!(evaluate("2+2"), "4");
        assert_eq!(evaluate(" 1 + 2 + 3 "), "6");
        assert_eq!(evaluate("hello"), "hello");
        assert_eq!(evaluate("2+x"), "2+x");
    }

    #[tokio::test]
    async fn output_and_error_chunks_concatenate() {
        let mut engine = boot().await;
        let (text, result) = capture(&mut engine, "output 2+2\nerror oops\noutput done").await;
        assert!(result.is_ok());
        assert_eq!(text, "4oopsdone");
    }

    #[tokio::test]
    async fn reset_clears_globals_but_not_files() {
        let mut engine = boot().await;
        let (_, result) = capture(&mut engine, "set name Ada\nwrite /www/a.txt kept").await;
        result.unwrap();
        engine.reset().await.unwrap();
        let (text, _) = capture(&mut engine, "get name\ncat /www/a.txt").await;
        assert_eq!(text, "nullkept");
    }

    #[tokio::test]
    async fn throw_is_an_execution_error() {
        let mut engine = boot().await;
        let (text, result) = capture(&mut engine, "output before\nthrow boom\noutput after").await;
        assert_eq!(text, "before");
        assert!(matches!(result, Err(EngineError::Execution(message)) if message == "boom"));
    }

    #[tokio::test]
    async fn php_source_is_echoed() {
        let mut engine = boot().await;
        let program = "<?php $_SERVER['A'] = 'b';\ninclude_once('x');";
        let (text, _) = capture(&mut engine, program).await;
        assert_eq!(text, program);
    }

    #[tokio::test]
    async fn boot_loads_the_persisted_mount() {
        let store = Store::in_memory().unwrap();
        store.namespace("/www").put("index.php", b"hello").unwrap();
        let factory = StubEngineFactory::new();
        let options = BootOptions::new("/www").with_persist(store.namespace("/www"));
        let engine = factory.boot(Bytes::from_static(b"stub"), options).await.unwrap();
        assert_eq!(engine.fs().read_file("/www/index.php").unwrap(), b"hello");
        assert_eq!(factory.boot_count(), 1);
    }

    #[tokio::test]
    async fn failing_factory_and_empty_image_refuse_to_boot() {
        let err = StubEngineFactory::failing("corrupt image")
            .boot(Bytes::from_static(b"stub"), BootOptions::new("/www"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "engine failed to boot: corrupt image");
        assert!(
            StubEngineFactory::new()
                .boot(Bytes::new(), BootOptions::new("/www"))
                .await
                .is_err()
        );
    }
}
