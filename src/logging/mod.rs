//! File logging
//!
//! `env_logger` formats records on the calling thread and hands the bytes to
//! an unbounded channel; a background task appends them to the log file.

use std::{
    io::{self, Write},
    path::Path,
};

use async_trait::async_trait;
use env_logger::Builder;
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, metadata, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::{
    config,
    core::{BackgroundService, ErrorContext, RunnerResult, ShutdownWatch},
    orchestration::shutdown::signalled,
};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    /// Install the global logger, writing through this file logger.
    ///
    /// Defaults to `info`; `RUST_LOG` overrides.
    pub fn init_env_logger(&self) {
        let writer = self.create_async_writer();
        let _ = Builder::new()
            .filter_level(LevelFilter::Info)
            .parse_env(env_logger::Env::default())
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .try_init();
    }

    async fn open(path: &Path) -> RunnerResult<BufWriter<File>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if metadata(parent).await.is_err() {
                create_dir_all(parent)
                    .await
                    .with_context("Failed to create log path")?;
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .with_context("Failed to open or create log file")?;
        Ok(BufWriter::new(file))
    }

    async fn write_record(file: &mut BufWriter<File>, data: &[u8]) {
        if let Err(e) = file.write_all(data).await {
            eprintln!("Failed to write to log file: {e}");
        }
    }
}

#[async_trait]
impl BackgroundService for Logger {
    async fn start_service(&mut self, mut shutdown: ShutdownWatch) {
        let mut file = match Self::open(&self.config.path).await {
            Ok(file) => file,
            Err(e) => {
                // The logger is the one that failed; stderr is all that is left
                eprintln!("{e}");
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                data = self.receiver.recv() => {
                    match data {
                        Some(data) => Self::write_record(&mut file, &data).await,
                        // Unreachable while `self.sender` is alive
                        None => break,
                    }
                }
                _ = signalled(&mut shutdown) => break,
            }
        }

        // Keep what was logged during shutdown
        while let Ok(data) = self.receiver.try_recv() {
            Self::write_record(&mut file, &data).await;
        }

        if let Err(e) = file.flush().await {
            eprintln!("Failed to flush log file: {e}");
        }
    }

    fn name(&self) -> &'static str {
        "log sync"
    }
}
