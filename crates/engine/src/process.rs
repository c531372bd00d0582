//! Runs the binary image as a CLI interpreter, one process per run.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::EngineError;
use crate::events::{EventStream, Stream};
use crate::fs::FileSystem;
use crate::host_fs::HostFs;
use crate::{BootOptions, Engine, EngineFactory};

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    host_root: PathBuf,
    args: Vec<String>,
}

impl ProcessEngineFactory {
    /// Engines see `host_root` as their filesystem root.
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the program, which arrives on stdin.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait(?Send)]
impl EngineFactory for ProcessEngineFactory {
    async fn boot(&self, image: Bytes, options: BootOptions) -> Result<Box<dyn Engine>, EngineError> {
        if image.is_empty() {
            return Err(EngineError::Boot("binary image is empty".to_string()));
        }
        let executable = materialize(image, &options.work_dir).await?;
        let fs = HostFs::new(&self.host_root);
        fs.create_dir_all(&options.mount)?;
        tracing::debug!("process engine ready at {}", executable.display());
        Ok(Box::new(ProcessEngine {
            executable,
            args: self.args.clone(),
            fs,
            events: EventStream::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Write the image once under `<work_dir>/bin/<sha256>`.
async fn materialize(image: Bytes, work_dir: &Path) -> Result<PathBuf, EngineError> {
    let digest = hex::encode(Sha256::digest(&image));
    let bin_dir = work_dir.join("bin");
    let path = bin_dir.join(&digest);
    if tokio::fs::try_exists(&path).await? {
        return Ok(path);
    }
    tokio::task::spawn_blocking(move || write_executable(&image, &bin_dir, path))
        .await
        .map_err(|err| EngineError::Boot(format!("writing engine image: {}", err)))?
}

fn write_executable(image: &[u8], bin_dir: &Path, path: PathBuf) -> Result<PathBuf, EngineError> {
    use std::io::Write;

    std::fs::create_dir_all(bin_dir)?;
    // Every writer stages its own file; racing renames carry identical bytes.
    let mut staging = tempfile::NamedTempFile::new_in(bin_dir)?;
    staging.write_all(image)?;
    staging.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staging.path(), std::fs::Permissions::from_mode(0o755))?;
    }
    match staging.persist(&path) {
        Ok(_) => Ok(path),
        Err(_) if path.is_file() => Ok(path),
        Err(err) => Err(err.error.into()),
    }
}

/// Splits a byte stream into UTF-8 text without breaking characters that
/// straddle two reads.
#[derive(Debug, Default)]
struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }

    /// Whatever is left once the stream ended.
    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a trailing, possibly unfinished multi-byte sequence.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return 0,
            Err(err) => match err.error_len() {
                None => return bytes.len() - start - err.valid_up_to(),
                Some(invalid) => start += err.valid_up_to() + invalid,
            },
        }
    }
}

#[derive(Debug)]
pub struct ProcessEngine {
    executable: PathBuf,
    args: Vec<String>,
    fs: HostFs,
    events: EventStream,
}

impl ProcessEngine {
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait(?Send)]
impl Engine for ProcessEngine {
    async fn reset(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn run(&mut self, code: &str) -> Result<(), EngineError> {
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .current_dir(self.fs.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Execution("engine stdin unavailable".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Execution("engine stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Execution("engine stderr unavailable".to_string()))?;

        let program = code.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&program).await;
            drop(stdin);
            result
        });

        let mut out_buf = vec![0u8; CHUNK_SIZE];
        let mut err_buf = vec![0u8; CHUNK_SIZE];
        let mut out_text = Utf8Chunks::default();
        let mut err_text = Utf8Chunks::default();
        let mut out_open = true;
        let mut err_open = true;
        let mut emitted = false;
        while out_open || err_open {
            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => match read? {
                    0 => {
                        out_open = false;
                        self.events.emit(Stream::Output, &out_text.finish());
                    }
                    n => {
                        emitted = true;
                        self.events.emit(Stream::Output, &out_text.push(&out_buf[..n]));
                    }
                },
                read = stderr.read(&mut err_buf), if err_open => match read? {
                    0 => {
                        err_open = false;
                        self.events.emit(Stream::Error, &err_text.finish());
                    }
                    n => {
                        emitted = true;
                        self.events.emit(Stream::Error, &err_text.push(&err_buf[..n]));
                    }
                },
            }
        }

        let status = child.wait().await?;
        // A broken pipe just means the interpreter stopped reading early.
        if let Ok(Err(err)) = writer.await {
            if err.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(err.into());
            }
        }
        if !status.success() && !emitted {
            return Err(EngineError::Exit {
                code: status.code(),
            });
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
