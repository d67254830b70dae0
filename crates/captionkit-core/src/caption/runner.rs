//! Captioning runs.
//!
//! [`Captioner`] owns the backend and remembers which model is loaded so that
//! consecutive runs with the same model, device and quantisation skip the
//! reload. [`CaptionManager`] wraps it for the RPC layer: one background run at
//! a time, a pollable progress snapshot, and cancellation between images.

use super::backend::{CaptionBackend, GenerationRequest, ModelLoadRequest};
use super::models::{effective_load_in_4_bit, resolve_model_id, ResolvedDevice};
use super::prompt::{
    caption_from_generated_text, format_cogvlm_prompt, input_text, parse_forced_words,
    processed_prompt, CaptionCleanup, ModelType,
};
use super::settings::{add_caption_to_tags, CaptionPosition, CaptionSettings, GenerationParameters};
use crate::cancel::CancellationToken;
use crate::dataset::{ImageEntry, ImageLibrary};
use crate::{CaptionKitError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything needed to caption images once the model is loaded.
#[derive(Debug, Clone)]
pub struct CaptionJob {
    pub model: ModelLoadRequest,
    /// Prompt after the model template was applied.
    pub prompt: String,
    pub caption_start: String,
    pub forced_words: Option<Vec<Vec<String>>>,
    pub position: CaptionPosition,
    pub remove_tag_separators: bool,
    pub generation_parameters: GenerationParameters,
}

/// Outcome for a single image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionResult {
    pub path: PathBuf,
    pub caption: String,
    /// Tags after the caption was placed according to the position setting.
    pub tags: Vec<String>,
}

/// Drives a [`CaptionBackend`].
pub struct Captioner {
    backend: Arc<dyn CaptionBackend>,
    loaded: Option<ModelLoadRequest>,
}

impl Captioner {
    pub fn new(backend: Arc<dyn CaptionBackend>) -> Self {
        Self {
            backend,
            loaded: None,
        }
    }

    pub fn loaded_model(&self) -> Option<&ModelLoadRequest> {
        self.loaded.as_ref()
    }

    /// Validate settings, pick the device and make sure the model is loaded.
    pub async fn prepare(
        &mut self,
        settings: &CaptionSettings,
        models_dir: Option<&Path>,
    ) -> Result<CaptionJob> {
        settings.validate()?;

        let capabilities = self.backend.capabilities().await?;
        let device = ResolvedDevice::resolve(settings.device, capabilities.cuda_available);
        if device == ResolvedDevice::Cpu && settings.device == super::settings::Device::Gpu {
            warn!("CUDA is not available, captioning on the CPU");
        }
        let load_in_4_bit = effective_load_in_4_bit(
            settings.load_in_4_bit,
            device,
            capabilities.bitsandbytes_available,
        );

        let model_type = ModelType::from_model_id(&settings.model);
        let model = ModelLoadRequest {
            model_id: resolve_model_id(&settings.model, models_dir),
            model_type,
            device,
            load_in_4_bit,
        };
        self.ensure_loaded(&model).await?;

        Ok(CaptionJob {
            prompt: processed_prompt(&settings.prompt, model_type),
            caption_start: settings.caption_start.clone(),
            forced_words: parse_forced_words(&settings.forced_words),
            position: settings.caption_position,
            remove_tag_separators: settings.remove_tag_separators,
            generation_parameters: settings.generation_parameters.clone(),
            model,
        })
    }

    async fn ensure_loaded(&mut self, model: &ModelLoadRequest) -> Result<()> {
        if self.loaded.as_ref() == Some(model) {
            debug!("Model {} already loaded", model.model_id);
            return Ok(());
        }

        if let Some(previous) = self.loaded.take() {
            info!("Unloading {}", previous.model_id);
            self.backend.unload_model().await?;
        }

        info!(
            "Loading {} on {} (4-bit: {})",
            model.model_id,
            model.device.as_server_str(),
            model.load_in_4_bit
        );
        self.backend.load_model(model).await?;
        self.loaded = Some(model.clone());
        Ok(())
    }

    /// Caption one image with a prepared job.
    pub async fn caption(
        &self,
        job: &CaptionJob,
        image: &ImageEntry,
        separator: &str,
    ) -> Result<CaptionResult> {
        let model_type = job.model.model_type;
        let conversation_prompt = (model_type == ModelType::Cogvlm)
            .then(|| format_cogvlm_prompt(&job.prompt, &job.caption_start));

        let request = GenerationRequest {
            image_path: image.path.clone(),
            model_type,
            text: input_text(&job.prompt, &job.caption_start, model_type),
            conversation_prompt,
            forced_words: job.forced_words.clone(),
            generation_parameters: job.generation_parameters.clone(),
        };
        let generated = self.backend.generate(&request).await?;

        let caption = caption_from_generated_text(
            &generated,
            &job.prompt,
            model_type,
            CaptionCleanup {
                caption_start: &job.caption_start,
                remove_separator: job.remove_tag_separators.then_some(separator),
            },
        );
        let tags = add_caption_to_tags(&image.tags, &caption, job.position);

        Ok(CaptionResult {
            path: image.path.clone(),
            caption,
            tags,
        })
    }

    /// Caption `images` in order, calling `on_result` after each one.
    ///
    /// Cancellation is checked before every image; a cancelled run returns
    /// [`CaptionKitError::Cancelled`] after the images already reported.
    pub async fn run<F>(
        &mut self,
        images: &[ImageEntry],
        settings: &CaptionSettings,
        separator: &str,
        models_dir: Option<&Path>,
        cancel: &CancellationToken,
        mut on_result: F,
    ) -> Result<Vec<CaptionResult>>
    where
        F: FnMut(usize, &CaptionResult),
    {
        let job = self.prepare(settings, models_dir).await?;
        let mut results = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            cancel.check()?;
            let result = self.caption(&job, image, separator).await?;
            on_result(index, &result);
            results.push(result);
        }
        Ok(results)
    }
}

/// Lifecycle of the current (or last) background run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Progress snapshot returned to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionProgress {
    pub state: CaptionState,
    pub completed: usize,
    /// Images removed from the list before their caption could be written.
    #[serde(default)]
    pub skipped: usize,
    pub total: usize,
    #[serde(default)]
    pub current_image: Option<PathBuf>,
    #[serde(default)]
    pub last_caption: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Runs captioning in the background, one run at a time.
pub struct CaptionManager {
    captioner: Arc<tokio::sync::Mutex<Captioner>>,
    progress: Arc<Mutex<CaptionProgress>>,
    cancel: Mutex<Option<CancellationToken>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CaptionManager {
    pub fn new(backend: Arc<dyn CaptionBackend>) -> Self {
        Self {
            captioner: Arc::new(tokio::sync::Mutex::new(Captioner::new(backend))),
            progress: Arc::new(Mutex::new(CaptionProgress::default())),
            cancel: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn progress(&self) -> CaptionProgress {
        lock(&self.progress).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.progress).state == CaptionState::Running
    }

    /// Start captioning `paths` from `library` in the background.
    ///
    /// Settings are validated and the images looked up before returning, so
    /// those errors surface to the caller. Each image's tags are read again
    /// when its caption is written, and images moved or deleted in the
    /// meantime are skipped. Returns the number of images queued.
    pub async fn start(
        &self,
        library: Arc<RwLock<ImageLibrary>>,
        paths: &[PathBuf],
        settings: CaptionSettings,
        models_dir: Option<PathBuf>,
    ) -> Result<usize> {
        settings.validate()?;

        let separator = {
            let library = library.read().await;
            if let Some(missing) = paths.iter().find(|path| library.get(path).is_none()) {
                return Err(CaptionKitError::ImageNotFound(missing.clone()));
            }
            library.separator().to_string()
        };

        let paths = paths.to_vec();
        let total = paths.len();
        {
            let mut progress = lock(&self.progress);
            if progress.state == CaptionState::Running {
                return Err(CaptionKitError::CaptioningInProgress);
            }
            *progress = CaptionProgress {
                state: CaptionState::Running,
                total,
                ..Default::default()
            };
        }

        let token = CancellationToken::new();
        *lock(&self.cancel) = Some(token.clone());

        info!("Captioning {} images with {}", total, settings.model);
        let captioner = self.captioner.clone();
        let shared = self.progress.clone();
        let handle = tokio::spawn(async move {
            let outcome = caption_in_background(
                &captioner,
                &library,
                &paths,
                &settings,
                &separator,
                models_dir.as_deref(),
                &shared,
                &token,
            )
            .await;

            let mut progress = lock(&shared);
            progress.current_image = None;
            match outcome {
                Ok(()) => {
                    info!("Captioning finished ({} images)", progress.completed);
                    progress.state = CaptionState::Completed;
                }
                Err(CaptionKitError::Cancelled) => {
                    info!("Captioning cancelled after {} images", progress.completed);
                    progress.state = CaptionState::Cancelled;
                }
                Err(e) => {
                    error!("Captioning failed: {}", e);
                    progress.state = CaptionState::Failed;
                    progress.error = Some(e.to_string());
                }
            }
        });
        *self.task.lock().await = Some(handle);

        Ok(total)
    }

    /// Request cancellation of the running job. Returns false if idle.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        match lock(&self.cancel).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for the background task, if any, to finish.
    pub async fn wait(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Captioning task panicked: {}", e);
            }
        }
    }

    /// Cancel any running job and free the loaded model.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel();
        self.wait().await;
        let mut captioner = self.captioner.lock().await;
        if captioner.loaded.take().is_some() {
            captioner.backend.unload_model().await?;
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn caption_in_background(
    captioner: &tokio::sync::Mutex<Captioner>,
    library: &RwLock<ImageLibrary>,
    paths: &[PathBuf],
    settings: &CaptionSettings,
    separator: &str,
    models_dir: Option<&Path>,
    progress: &Mutex<CaptionProgress>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut captioner = captioner.lock().await;
    let job = captioner.prepare(settings, models_dir).await?;

    for path in paths {
        cancel.check()?;

        // Tags may have been edited since the run was queued.
        let Some(image) = library.read().await.get(path).cloned() else {
            skip_missing(progress, path);
            continue;
        };
        lock(progress).current_image = Some(path.clone());

        let result = captioner.caption(&job, &image, separator).await?;
        debug!("{}: {}", image.file_name(), result.caption);

        if job.position != CaptionPosition::DoNotAdd {
            let mut library = library.write().await;
            let tags = library
                .get(path)
                .map(|current| add_caption_to_tags(&current.tags, &result.caption, job.position));
            match tags {
                Some(tags) => library.update_tags(path, tags)?,
                None => {
                    drop(library);
                    skip_missing(progress, path);
                    continue;
                }
            }
        }

        let mut progress = lock(progress);
        progress.completed += 1;
        progress.last_caption = Some(result.caption);
    }
    Ok(())
}

fn skip_missing(progress: &Mutex<CaptionProgress>, path: &Path) {
    warn!("Skipping {}: no longer in the image list", path.display());
    lock(progress).skipped += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::backend::DeviceCapabilities;
    use crate::caption::settings::Device;
    use async_trait::async_trait;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockBackend {
        cuda: bool,
        bitsandbytes: bool,
        delay: Option<Duration>,
        fail_on: Option<String>,
        loads: Mutex<Vec<ModelLoadRequest>>,
        unloads: Mutex<usize>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl CaptionBackend for MockBackend {
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn capabilities(&self) -> Result<DeviceCapabilities> {
            Ok(DeviceCapabilities {
                cuda_available: self.cuda,
                bitsandbytes_available: self.bitsandbytes,
            })
        }

        async fn load_model(&self, request: &ModelLoadRequest) -> Result<()> {
            self.loads.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn unload_model(&self) -> Result<()> {
            *self.unloads.lock().unwrap() += 1;
            Ok(())
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let name = request
                .image_path
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            if self.fail_on.as_deref() == Some(name.as_str()) {
                return Err(CaptionKitError::Inference {
                    message: "out of memory".into(),
                });
            }
            self.requests.lock().unwrap().push(request.clone());
            Ok(format!("{} a photo of {}", request.text, name))
        }
    }

    fn entry(name: &str, tags: &[&str]) -> ImageEntry {
        ImageEntry {
            path: PathBuf::from(format!("/data/{}.png", name)),
            dimensions: Some((64, 64)),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn settings() -> CaptionSettings {
        CaptionSettings {
            prompt: "Describe the image.".into(),
            model: "Salesforce/blip2-opt-2.7b".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_captions_in_order_and_places_caption() {
        let backend = Arc::new(MockBackend::default());
        let mut captioner = Captioner::new(backend.clone());
        let images = vec![entry("cat", &["animal"]), entry("dog", &[])];
        let mut seen = Vec::new();

        let results = captioner
            .run(
                &images,
                &settings(),
                ",",
                None,
                &CancellationToken::new(),
                |index, result| seen.push((index, result.caption.clone())),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].caption, "a photo of cat");
        assert_eq!(results[0].tags, vec!["a photo of cat", "animal"]);
        assert_eq!(results[1].tags, vec!["a photo of dog"]);
        assert_eq!(seen, vec![(0, "a photo of cat".into()), (1, "a photo of dog".into())]);
    }

    #[tokio::test]
    async fn test_model_reloaded_only_on_change() {
        let backend = Arc::new(MockBackend {
            cuda: true,
            bitsandbytes: true,
            ..Default::default()
        });
        let mut captioner = Captioner::new(backend.clone());
        let mut settings = settings();

        captioner.prepare(&settings, None).await.unwrap();
        captioner.prepare(&settings, None).await.unwrap();
        assert_eq!(backend.loads.lock().unwrap().len(), 1);
        assert_eq!(*backend.unloads.lock().unwrap(), 0);

        let first = captioner.loaded_model().unwrap().clone();
        assert_eq!(first.device, ResolvedDevice::Cuda);
        assert!(first.load_in_4_bit);

        settings.load_in_4_bit = false;
        captioner.prepare(&settings, None).await.unwrap();
        assert_eq!(backend.loads.lock().unwrap().len(), 2);
        assert_eq!(*backend.unloads.lock().unwrap(), 1);

        settings.device = Device::Cpu;
        captioner.prepare(&settings, None).await.unwrap();
        let last = captioner.loaded_model().unwrap();
        assert_eq!(last.device, ResolvedDevice::Cpu);
        assert_eq!(backend.loads.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gpu_falls_back_to_cpu_without_4_bit() {
        let backend = Arc::new(MockBackend {
            bitsandbytes: true,
            ..Default::default()
        });
        let mut captioner = Captioner::new(backend);
        let job = captioner.prepare(&settings(), None).await.unwrap();
        assert_eq!(job.model.device, ResolvedDevice::Cpu);
        assert!(!job.model.load_in_4_bit);
    }

    #[tokio::test]
    async fn test_cogvlm_request_carries_conversation_prompt() {
        let backend = Arc::new(MockBackend::default());
        let mut captioner = Captioner::new(backend.clone());
        let settings = CaptionSettings {
            prompt: String::new(),
            caption_start: "A photo of".into(),
            forced_words: "red|blue, car".into(),
            model: "THUDM/cogvlm-chat-hf".into(),
            generation_parameters: GenerationParameters {
                num_beams: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let job = captioner.prepare(&settings, None).await.unwrap();
        captioner.caption(&job, &entry("car", &[]), ",").await.unwrap();

        let requests = backend.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.model_type, ModelType::Cogvlm);
        let conversation = request.conversation_prompt.as_deref().unwrap();
        assert!(conversation.starts_with("Question: "));
        assert!(conversation.ends_with("Answer: A photo of"));
        assert_eq!(
            request.forced_words,
            Some(vec![
                vec!["red".to_string(), "blue".to_string()],
                vec!["car".to_string()]
            ])
        );
    }

    #[tokio::test]
    async fn test_remove_tag_separators() {
        let backend = Arc::new(MockBackend::default());
        let mut captioner = Captioner::new(backend);
        let settings = CaptionSettings {
            prompt: String::new(),
            caption_start: "red, blue".into(),
            model: "Salesforce/blip2-opt-2.7b".into(),
            ..Default::default()
        };
        let job = captioner.prepare(&settings, None).await.unwrap();
        let result = captioner.caption(&job, &entry("car", &[]), ",").await.unwrap();
        assert!(!result.caption.contains(','));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_image() {
        let backend = Arc::new(MockBackend::default());
        let mut captioner = Captioner::new(backend.clone());
        let token = CancellationToken::new();
        token.cancel();

        let err = captioner
            .run(&[entry("cat", &[])], &settings(), ",", None, &token, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, CaptionKitError::Cancelled));
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected_before_loading() {
        let backend = Arc::new(MockBackend::default());
        let mut captioner = Captioner::new(backend.clone());
        let settings = CaptionSettings {
            forced_words: "cat".into(),
            ..settings()
        };
        let err = captioner.prepare(&settings, None).await.unwrap_err();
        assert!(matches!(err, CaptionKitError::Validation { .. }));
        assert!(backend.loads.lock().unwrap().is_empty());
    }

    fn library_with(dir: &TempDir, names: &[&str]) -> Arc<RwLock<ImageLibrary>> {
        for name in names {
            image::RgbImage::new(8, 8)
                .save(dir.path().join(format!("{}.png", name)))
                .unwrap();
        }
        fs::write(dir.path().join("a.txt"), "existing").unwrap();
        let mut library = ImageLibrary::new(",");
        library.load_directory(dir.path()).unwrap();
        Arc::new(RwLock::new(library))
    }

    #[tokio::test]
    async fn test_manager_writes_tags_and_completes() {
        let dir = TempDir::new().unwrap();
        let library = library_with(&dir, &["a", "b"]);
        let paths: Vec<PathBuf> = library.read().await.images().iter().map(|i| i.path.clone()).collect();

        let manager = CaptionManager::new(Arc::new(MockBackend::default()));
        let queued = manager
            .start(library.clone(), &paths, settings(), None)
            .await
            .unwrap();
        assert_eq!(queued, 2);
        manager.wait().await;

        let progress = manager.progress();
        assert_eq!(progress.state, CaptionState::Completed);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.last_caption.as_deref(), Some("a photo of b"));

        let sidecar = fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(sidecar, "a photo of a,existing");
        assert_eq!(library.read().await.images()[1].tags, vec!["a photo of b"]);
    }

    #[tokio::test]
    async fn test_manager_do_not_add_leaves_tags() {
        let dir = TempDir::new().unwrap();
        let library = library_with(&dir, &["a"]);
        let paths = vec![dir.path().join("a.png")];
        let settings = CaptionSettings {
            caption_position: CaptionPosition::DoNotAdd,
            ..settings()
        };

        let manager = CaptionManager::new(Arc::new(MockBackend::default()));
        manager.start(library, &paths, settings, None).await.unwrap();
        manager.wait().await;

        assert_eq!(manager.progress().state, CaptionState::Completed);
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "existing"
        );
    }

    #[tokio::test]
    async fn test_manager_reports_failure() {
        let dir = TempDir::new().unwrap();
        let library = library_with(&dir, &["a", "b"]);
        let paths = vec![dir.path().join("a.png"), dir.path().join("b.png")];
        let backend = MockBackend {
            fail_on: Some("b".into()),
            ..Default::default()
        };

        let manager = CaptionManager::new(Arc::new(backend));
        manager.start(library, &paths, settings(), None).await.unwrap();
        manager.wait().await;

        let progress = manager.progress();
        assert_eq!(progress.state, CaptionState::Failed);
        assert_eq!(progress.completed, 1);
        assert!(progress.error.unwrap().contains("out of memory"));
    }

    #[tokio::test]
    async fn test_manager_single_run_and_cancel() {
        let dir = TempDir::new().unwrap();
        let library = library_with(&dir, &["a", "b", "c"]);
        let paths: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|n| dir.path().join(format!("{}.png", n)))
            .collect();
        let backend = MockBackend {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };

        let manager = CaptionManager::new(Arc::new(backend));
        assert!(!manager.cancel());
        manager
            .start(library.clone(), &paths, settings(), None)
            .await
            .unwrap();

        let err = manager
            .start(library, &paths, settings(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptionKitError::CaptioningInProgress));

        assert!(manager.cancel());
        manager.wait().await;

        let progress = manager.progress();
        assert_eq!(progress.state, CaptionState::Cancelled);
        assert!(progress.completed < 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_keeps_tag_edits_made_during_run() {
        let dir = TempDir::new().unwrap();
        let library = library_with(&dir, &["a"]);
        let image = dir.path().join("a.png");
        let backend = MockBackend {
            delay: Some(Duration::from_millis(300)),
            ..Default::default()
        };

        let manager = CaptionManager::new(Arc::new(backend));
        manager
            .start(library.clone(), &[image.clone()], settings(), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        library
            .write()
            .await
            .update_tags(&image, vec!["edited".into(), "tags".into()])
            .unwrap();
        manager.wait().await;

        assert_eq!(manager.progress().state, CaptionState::Completed);
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "a photo of a,edited,tags"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_skips_images_removed_during_run() {
        let dir = TempDir::new().unwrap();
        let library = library_with(&dir, &["a", "b", "c"]);
        let paths: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|n| dir.path().join(format!("{}.png", n)))
            .collect();
        let backend = MockBackend {
            delay: Some(Duration::from_millis(300)),
            ..Default::default()
        };

        let manager = CaptionManager::new(Arc::new(backend));
        manager
            .start(library.clone(), &paths, settings(), None)
            .await
            .unwrap();

        // "a" is being captioned, "b" has not been reached yet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let elsewhere = TempDir::new().unwrap();
        let report = library
            .write()
            .await
            .move_images(&paths[..2], elsewhere.path())
            .unwrap();
        assert_eq!(report.succeeded.len(), 2);
        manager.wait().await;

        let progress = manager.progress();
        assert_eq!(progress.state, CaptionState::Completed);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.skipped, 2);
        assert_eq!(progress.last_caption.as_deref(), Some("a photo of c"));
        assert_eq!(
            fs::read_to_string(elsewhere.path().join("a.txt")).unwrap(),
            "existing"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("c.txt")).unwrap(),
            "a photo of c"
        );
    }

    #[tokio::test]
    async fn test_manager_unknown_image() {
        let dir = TempDir::new().unwrap();
        let library = library_with(&dir, &["a"]);
        let manager = CaptionManager::new(Arc::new(MockBackend::default()));

        let err = manager
            .start(library, &[dir.path().join("missing.png")], settings(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptionKitError::ImageNotFound(_)));
        assert_eq!(manager.progress().state, CaptionState::Idle);
    }
}
