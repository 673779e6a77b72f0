#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use pdf_squeeze::config::{Profile, Settings};
use pdf_squeeze::control::RunControl;
use pdf_squeeze::error::StrategyError;
use pdf_squeeze::path_matcher::LogicalFolder;
use pdf_squeeze::pipeline::Pipeline;
use pdf_squeeze::storage::MemoryStorage;
use pdf_squeeze::strategies::{CompressionStrategy, StrategySet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Builds an uncompressed PDF whose content stream carries `padding` spaces.
pub fn pdf_bytes(pages: usize, padding: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut content = b"BT /F1 12 Tf 72 712 Td (test page) Tj ET\n".to_vec();
    content.extend(std::iter::repeat(b' ').take(padding));
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn write_pdf(path: &Path, pages: usize, padding: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, pdf_bytes(pages, padding)).unwrap();
}

pub fn create_temp_directory() -> TempDir {
    TempDir::new().unwrap()
}

/// What a [`ScriptedStrategy`] does when asked to compress.
#[derive(Clone)]
pub enum Script {
    /// Writes these bytes as the output.
    Emit(Vec<u8>),
    /// Writes the bytes, then raises the stop flag of a run.
    EmitAndStop(Vec<u8>, RunControl),
    Fail,
    Unavailable,
    /// Panics inside the worker task.
    Panic,
}

/// A backend with a fixed behavior that counts its invocations.
pub struct ScriptedStrategy {
    name: String,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompressionStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn preserves_structure(&self) -> bool {
        true
    }

    async fn available(&self) -> bool {
        !matches!(self.script, Script::Unavailable)
    }

    async fn compress(&self, _input: &Path, output: &Path, _profile: &Profile) -> Result<(), StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Emit(bytes) => tokio::fs::write(output, bytes).await.map_err(|e| self.failed(e)),
            Script::EmitAndStop(bytes, control) => {
                tokio::fs::write(output, bytes).await.map_err(|e| self.failed(e))?;
                control.request_stop();
                Ok(())
            }
            Script::Fail => Err(StrategyError::Failed {
                strategy: self.name.clone(),
                message: "scripted failure".to_string(),
            }),
            Script::Unavailable => Err(StrategyError::Unavailable {
                strategy: self.name.clone(),
            }),
            Script::Panic => panic!("{} crashed", self.name),
        }
    }
}

impl ScriptedStrategy {
    fn failed(&self, err: std::io::Error) -> StrategyError {
        StrategyError::Failed {
            strategy: self.name.clone(),
            message: err.to_string(),
        }
    }
}

pub fn strategy_set(strategies: &[Arc<ScriptedStrategy>]) -> StrategySet {
    StrategySet::single(
        strategies
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn CompressionStrategy>)
            .collect(),
    )
}

/// Settings for a remote laid out as `/pdf/Input`, `/pdf/Compressed`, `/pdf/Backup`.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.folders.input = LogicalFolder::new("/pdf/Input");
    settings.folders.output = LogicalFolder::new("/pdf/Compressed");
    settings.folders.backup = LogicalFolder::new("/pdf/Backup");
    settings.limits.min_file_size_kb = 1;
    settings.limits.workers = 2;
    settings.limits.run_timeout_secs = 600;
    settings
}

pub fn test_pipeline(
    storage: &Arc<MemoryStorage>,
    settings: Settings,
    strategies: &[Arc<ScriptedStrategy>],
) -> Pipeline {
    Pipeline::with_strategies(storage.clone(), settings, strategy_set(strategies))
        .unwrap()
        .with_progress(false)
}

pub const RUN_TIMEOUT: Duration = Duration::from_secs(600);
