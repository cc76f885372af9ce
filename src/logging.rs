use crate::errors::{AppError, AppResult};
use crate::settings::SettingsStore;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::Dispatch;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

type LevelHandle = reload::Handle<LevelFilter, Registry>;

pub fn parse_level(raw: &str) -> LevelFilter {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "critical" => LevelFilter::ERROR,
        "off" | "none" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    pub console_enabled: bool,
    #[serde(serialize_with = "serialize_level")]
    pub console_level: LevelFilter,
    pub file_enabled: bool,
    #[serde(serialize_with = "serialize_level")]
    pub file_level: LevelFilter,
    pub file_path: PathBuf,
}

fn serialize_level<S: serde::Serializer>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&level.to_string())
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            console_enabled: true,
            console_level: LevelFilter::INFO,
            file_enabled: false,
            file_level: LevelFilter::INFO,
            file_path: PathBuf::from("/var/log/dofler.log"),
        }
    }
}

impl LogSettings {
    pub fn from_store(store: &dyn SettingsStore) -> AppResult<Self> {
        Ok(Self {
            console_enabled: store.get("log_console")?.bool_value(),
            console_level: parse_level(store.get("log_console_level")?.value()),
            file_enabled: store.get("log_file")?.bool_value(),
            file_level: parse_level(store.get("log_file_level")?.value()),
            file_path: PathBuf::from(store.get("log_file_path")?.value()),
        })
    }

    pub fn effective_console_level(&self) -> LevelFilter {
        if self.console_enabled {
            self.console_level
        } else {
            LevelFilter::OFF
        }
    }

    pub fn effective_file_level(&self) -> LevelFilter {
        if self.file_enabled {
            self.file_level
        } else {
            LevelFilter::OFF
        }
    }
}

#[derive(Clone, Default)]
struct FileWriter {
    inner: Arc<RwLock<Option<NonBlocking>>>,
}

impl FileWriter {
    fn replace(&self, writer: Option<NonBlocking>) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = writer;
        }
    }
}

enum FileSink {
    File(NonBlocking),
    Discard,
}

impl io::Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(writer) => writer.write(buf),
            Self::Discard => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(writer) => writer.flush(),
            Self::Discard => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = FileSink;

    fn make_writer(&'a self) -> Self::Writer {
        match self.inner.read() {
            Ok(slot) => slot.as_ref().cloned().map_or(FileSink::Discard, FileSink::File),
            Err(_) => FileSink::Discard,
        }
    }
}

struct OpenFile {
    path: PathBuf,
    _guard: WorkerGuard,
}

pub struct LogSinks {
    dispatch: Dispatch,
    console: LevelHandle,
    file: LevelHandle,
    file_writer: FileWriter,
    open_file: Mutex<Option<OpenFile>>,
    current: Mutex<LogSettings>,
}

impl LogSinks {
    pub fn install() -> AppResult<Arc<Self>> {
        let sinks = Self::detached();
        tracing::dispatcher::set_global_default(sinks.dispatch.clone())
            .map_err(|error| AppError::Internal(error.to_string()))?;
        Ok(sinks)
    }

    pub fn detached() -> Arc<Self> {
        let initial = LogSettings::default();
        let (console_filter, console) = reload::Layer::new(initial.effective_console_level());
        let (file_filter, file) = reload::Layer::new(LevelFilter::OFF);
        let file_writer = FileWriter::default();

        let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(console_filter)
                .boxed(),
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer.clone())
                .with_filter(file_filter)
                .boxed(),
        ];

        let subscriber = Registry::default()
            .with(layers)
            .with(EnvFilter::try_from_default_env().ok());

        Arc::new(Self {
            dispatch: Dispatch::new(subscriber),
            console,
            file,
            file_writer,
            open_file: Mutex::new(None),
            current: Mutex::new(initial),
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn current(&self) -> LogSettings {
        self.current
            .lock()
            .map(|current| current.clone())
            .unwrap_or_default()
    }

    // A log file that cannot be opened leaves the file sink off and returns Io.
    pub fn reconfigure(&self, settings: &LogSettings) -> AppResult<()> {
        self.console
            .reload(settings.effective_console_level())
            .map_err(|error| AppError::Internal(error.to_string()))?;

        let mut applied = settings.clone();
        let file_result = self.reconfigure_file(settings);
        if file_result.is_err() {
            applied.file_enabled = false;
        }
        self.file
            .reload(applied.effective_file_level())
            .map_err(|error| AppError::Internal(error.to_string()))?;

        if let Ok(mut current) = self.current.lock() {
            *current = applied;
        }
        file_result
    }

    fn reconfigure_file(&self, settings: &LogSettings) -> AppResult<()> {
        let mut open_file = self
            .open_file
            .lock()
            .map_err(|_| AppError::Internal("log sink mutex poisoned".to_string()))?;

        if !settings.file_enabled {
            self.file_writer.replace(None);
            *open_file = None;
            return Ok(());
        }

        if open_file
            .as_ref()
            .is_some_and(|open| open.path == settings.file_path)
        {
            return Ok(());
        }

        match open_appender(&settings.file_path) {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                self.file_writer.replace(Some(writer));
                *open_file = Some(OpenFile {
                    path: settings.file_path.clone(),
                    _guard: guard,
                });
                Ok(())
            }
            Err(error) => {
                self.file_writer.replace(None);
                *open_file = None;
                Err(error)
            }
        }
    }
}

fn open_appender(path: &Path) -> AppResult<RollingFileAppender> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AppError::Io(format!("log file path {} has no file name", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|error| AppError::Io(error.to_string()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(&dir)
        .map_err(|error| AppError::Io(format!("{}: {}", path.display(), error)))
}
