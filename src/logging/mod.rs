//! Logging sink (§A.1): an `env_logger`-driven frontend with an optional
//! async file-backed writer running as a pingora background `Service`,
//! grounded on the teacher's `logging` module (`AsyncWriter` forwarding
//! formatted lines over an unbounded channel to a background task that owns
//! the file handle, so no request-path code blocks on disk I/O, and the
//! task itself drains on the server's shutdown signal rather than an
//! ad hoc channel close). `format = "json"` switches the line formatter;
//! everything else about the pipeline stays the same.

use std::io::{self, Write};

use async_trait::async_trait;
use env_logger::Builder;
use log::LevelFilter;
use pingora::server::{ListenFds, ShutdownWatch};
use pingora_core::services::Service;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::config::LoggingConfig;

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender
            .send(data)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn level_filter(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn format_record(
    buf: &mut env_logger::fmt::Formatter,
    record: &log::Record,
    json: bool,
) -> io::Result<()> {
    if json {
        writeln!(
            buf,
            r#"{{"level":"{}","target":"{}","message":{}}}"#,
            record.level(),
            record.target(),
            serde_json::to_string(&record.args().to_string()).unwrap_or_else(|_| "\"\"".into())
        )
    } else {
        writeln!(
            buf,
            "[{} {}] {}",
            record.level(),
            record.target(),
            record.args()
        )
    }
}

/// Initializes the global logger from the configuration record. When
/// `config.file` is set, the returned `Logger` must also be registered with
/// the pingora server (`server.add_service(logger)`) so the writer task
/// actually runs; when unset, logging goes straight to stderr via
/// `env_logger` and `None` is returned.
pub fn init(config: &LoggingConfig) -> Option<Logger> {
    let level = level_filter(&config.level);
    let json = config.format.eq_ignore_ascii_case("json");

    match &config.file {
        Some(path) => {
            let logger = Logger::new(path.clone());
            let writer = logger.create_async_writer();
            Builder::new()
                .filter(None, level)
                .format(move |buf, record| format_record(buf, record, json))
                .target(env_logger::Target::Pipe(Box::new(writer)))
                .init();
            Some(logger)
        }
        None => {
            Builder::new()
                .filter(None, level)
                .format(move |buf, record| format_record(buf, record, json))
                .init();
            None
        }
    }
}

/// Background writer service (§A.1): owns the log file handle, draining
/// lines sent by every `AsyncWriter` clone over an unbounded channel until
/// the server's shutdown signal fires.
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    path: String,
}

impl Logger {
    fn new(path: String) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Logger {
            sender,
            receiver,
            path,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }
}

#[async_trait]
impl Service for Logger {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        if let Some(parent) = std::path::Path::new(&self.path).parent() {
            if metadata(parent).await.is_err() {
                if let Err(e) = create_dir_all(parent).await {
                    log::error!("failed to create log directory: {e}");
                    return;
                }
            }
        }

        let file = match OpenOptions::new()
            .write(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                log::error!("failed to open log file {}: {e}", self.path);
                return;
            }
        };
        let mut file = BufWriter::new(file);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },
                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                log::error!("failed to write to log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = file.flush().await;
    }

    fn name(&self) -> &'static str {
        "log sync"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_parses_known_levels() {
        assert_eq!(level_filter("debug"), LevelFilter::Debug);
        assert_eq!(level_filter("WARN"), LevelFilter::Warn);
        assert_eq!(level_filter("unknown"), LevelFilter::Info);
    }
}
