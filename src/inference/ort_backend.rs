//! ONNX Runtime backend implementation

use super::{InferenceBackend, InferenceError, ModelPostProcessor, YoloPostProcessor};
use crate::config::InferenceConfig;
use crate::utils::{ClassNames, Detection};
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
        ExecutionProviderDispatch,
    },
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Input name used by Ultralytics ONNX exports
const DEFAULT_INPUT_NAME: &str = "images";

/// Where the session should execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionDevice {
    /// Try accelerators first and fall back to CPU silently
    Auto,
    Cpu,
    Cuda,
    CoreMl,
}

impl FromStr for ExecutionDevice {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(InferenceError::ModelLoadError(format!(
                "unsupported device: {}",
                other
            ))),
        }
    }
}

impl ExecutionDevice {
    /// Execution providers to register, in priority order
    fn providers(self) -> Vec<ExecutionProviderDispatch> {
        match self {
            ExecutionDevice::Auto => {
                let mut providers = vec![CUDAExecutionProvider::default().build()];
                if cfg!(target_vendor = "apple") {
                    providers.push(CoreMLExecutionProvider::default().build());
                }
                providers.push(CPUExecutionProvider::default().build());
                providers
            }
            ExecutionDevice::Cpu => vec![CPUExecutionProvider::default().build()],
            ExecutionDevice::Cuda => vec![CUDAExecutionProvider::default()
                .build()
                .error_on_failure()],
            ExecutionDevice::CoreMl => vec![CoreMLExecutionProvider::default()
                .build()
                .error_on_failure()],
        }
    }
}

/// ONNX Runtime inference backend for YOLOv8 detection models
pub struct OrtBackend {
    session: Option<Mutex<Session>>,
    input_name: String,
    input_shape: Vec<usize>,
    confidence_threshold: f32,
    post_processor: Box<dyn ModelPostProcessor + Send + Sync>,
    class_names: ClassNames,
    fallback_names: Option<ClassNames>,
    device: ExecutionDevice,
    intra_threads: usize,
}

impl OrtBackend {
    /// Create a new ORT backend with default settings
    pub fn new() -> Self {
        OrtBackendBuilder::new().build()
    }

    /// Build an unloaded backend from inference settings
    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let size = config.image_size as usize;
        Ok(OrtBackendBuilder::new()
            .with_input_shape(vec![1, 3, size, size])
            .with_confidence_threshold(config.confidence_threshold)
            .with_post_processor(Box::new(
                YoloPostProcessor::new(config.iou_threshold, config.max_detections)
                    .with_input_size(size, size),
            ))
            .with_device(config.device.parse()?)
            .build())
    }

    pub fn device(&self) -> ExecutionDevice {
        self.device
    }

    /// Create an optimized session on the configured device
    fn create_session(&self, model_path: &Path) -> Result<Session, InferenceError> {
        info!(
            "Creating ONNX Runtime session on {:?} for {}",
            self.device,
            model_path.display()
        );

        Session::builder()
            .map_err(|e| {
                InferenceError::OrtError(format!("Failed to create session builder: {}", e))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                InferenceError::OrtError(format!("Failed to set optimization level: {}", e))
            })?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| InferenceError::OrtError(format!("Failed to set intra threads: {}", e)))?
            .with_execution_providers(self.device.providers())
            .map_err(|e| {
                InferenceError::OrtError(format!(
                    "Failed to register {:?} execution provider: {}",
                    self.device, e
                ))
            })?
            .commit_from_file(model_path)
            .map_err(|e| InferenceError::ModelLoadError(format!("{}: {}", model_path.display(), e)))
    }

    /// Read class names from the Ultralytics `names` metadata entry
    fn read_class_names(session: &Session) -> Option<ClassNames> {
        let metadata = match session.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Could not read model metadata: {}", e);
                return None;
            }
        };

        match metadata.custom("names") {
            Ok(Some(raw)) => match ClassNames::parse_ultralytics(&raw) {
                Ok(names) => Some(names),
                Err(e) => {
                    warn!("Ignoring malformed class names metadata: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read class names metadata: {}", e);
                None
            }
        }
    }

    /// Metadata names win, then names given to the builder, then a guess from the class count
    fn resolve_class_names(
        metadata: Option<ClassNames>,
        fallback: Option<&ClassNames>,
        num_classes: usize,
    ) -> ClassNames {
        if let Some(names) = metadata {
            if names.len() != num_classes {
                warn!(
                    "Model metadata lists {} class names but the output has {} classes",
                    names.len(),
                    num_classes
                );
            }
            return names;
        }

        match fallback {
            Some(names) => names.clone(),
            None => {
                debug!("No class names in model metadata, guessing from {} classes", num_classes);
                ClassNames::for_class_count(num_classes)
            }
        }
    }

    /// Run the session on a blank input and return the output shape
    fn warm_up(&self) -> Result<Vec<usize>, InferenceError> {
        let blank = vec![0.0f32; self.input_shape.iter().product()];
        let start = Instant::now();
        let (_, output_shape) = self.run_session(&blank)?;
        debug!(
            "Warm-up run took {:.1}ms, output shape {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            output_shape
        );
        Ok(output_shape)
    }

    /// Run the session and copy out the first output with its shape
    fn run_session(&self, input: &[f32]) -> Result<(Vec<f32>, Vec<usize>), InferenceError> {
        let session = self
            .session
            .as_ref()
            .ok_or(InferenceError::ModelNotLoaded)?;

        self.validate_input(input)?;
        let input_tensor = self.create_input_tensor(input)?;

        let mut session_guard = session.lock().map_err(|e| {
            InferenceError::InferenceFailed(format!("Failed to acquire session lock: {}", e))
        })?;
        let outputs = session_guard
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| InferenceError::InferenceFailed(format!("Session run failed: {}", e)))?;

        let first_output = outputs.values().next().ok_or_else(|| {
            InferenceError::InvalidOutputFormat("No outputs received from model".to_string())
        })?;

        let output_array = first_output.try_extract_array::<f32>().map_err(|e| {
            InferenceError::OrtError(format!("Failed to extract output tensor: {}", e))
        })?;
        let output_shape = output_array.shape().to_vec();
        let output_data: Vec<f32> = output_array.iter().copied().collect();

        Ok((output_data, output_shape))
    }

    /// Validate input tensor length
    fn validate_input(&self, input: &[f32]) -> Result<(), InferenceError> {
        let expected_size: usize = self.input_shape.iter().product();
        if input.len() != expected_size {
            return Err(InferenceError::InvalidInputShape {
                expected: self.input_shape.clone(),
                actual: vec![input.len()],
            });
        }
        Ok(())
    }

    /// Convert input data to an ONNX tensor
    fn create_input_tensor(&self, input: &[f32]) -> Result<Tensor<f32>, InferenceError> {
        let array = ndarray::Array::from_shape_vec(self.input_shape.clone(), input.to_vec())
            .map_err(|e| InferenceError::OrtError(format!("Failed to create ndarray: {}", e)))?;

        Tensor::from_array(array)
            .map_err(|e| InferenceError::OrtError(format!("Failed to create input tensor: {}", e)))
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for OrtBackend {
    fn load_model(&mut self, path: &Path) -> Result<(), InferenceError> {
        if !path.exists() {
            return Err(InferenceError::ModelNotFound(path.to_path_buf()));
        }

        let session = self.create_session(path)?;

        self.input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string());

        let metadata_names = Self::read_class_names(&session);
        self.session = Some(Mutex::new(session));

        let num_classes = match self
            .warm_up()
            .and_then(|shape| self.post_processor.class_count(&shape))
        {
            Ok(num_classes) => num_classes,
            Err(e) => {
                self.session = None;
                return Err(e);
            }
        };

        self.class_names = Self::resolve_class_names(
            metadata_names,
            self.fallback_names.as_ref(),
            num_classes,
        );
        info!(
            "Model has {} classes (input '{}')",
            num_classes, self.input_name
        );
        Ok(())
    }

    fn infer(&self, input: &[f32]) -> Result<Vec<Detection>, InferenceError> {
        let inference_start = Instant::now();

        let (output_data, output_shape) = self.run_session(input)?;
        let session_time = inference_start.elapsed();

        let detections = self.post_processor.process_raw_output(
            &output_data,
            &output_shape,
            self.confidence_threshold,
        )?;
        let candidates = detections.len();
        let detections = self.post_processor.apply_nms(detections);

        let total_time = inference_start.elapsed();
        debug!(
            "inference_time_ms={:.2} session_time_ms={:.2} candidates={} kept={}",
            total_time.as_secs_f64() * 1000.0,
            session_time.as_secs_f64() * 1000.0,
            candidates,
            detections.len()
        );

        Ok(detections)
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    fn set_confidence_threshold(&mut self, threshold: f32) {
        if !(0.0..=1.0).contains(&threshold) {
            warn!(
                "Invalid confidence threshold {}, keeping current value {}",
                threshold, self.confidence_threshold
            );
            return;
        }
        self.confidence_threshold = threshold;
    }
}

/// Builder for ORT backend configuration
pub struct OrtBackendBuilder {
    input_shape: Vec<usize>,
    confidence_threshold: f32,
    post_processor: Option<Box<dyn ModelPostProcessor + Send + Sync>>,
    class_names: Option<ClassNames>,
    device: ExecutionDevice,
    intra_threads: usize,
}

impl OrtBackendBuilder {
    pub fn new() -> Self {
        Self {
            input_shape: vec![1, 3, 640, 640],
            confidence_threshold: 0.4,
            post_processor: None,
            class_names: None,
            device: ExecutionDevice::Auto,
            intra_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }

    pub fn with_input_shape(mut self, shape: Vec<usize>) -> Self {
        self.input_shape = shape;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_post_processor(
        mut self,
        processor: Box<dyn ModelPostProcessor + Send + Sync>,
    ) -> Self {
        self.post_processor = Some(processor);
        self
    }

    /// Names used when the model carries no `names` metadata
    pub fn with_class_names(mut self, names: ClassNames) -> Self {
        self.class_names = Some(names);
        self
    }

    pub fn with_device(mut self, device: ExecutionDevice) -> Self {
        self.device = device;
        self
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    pub fn build(self) -> OrtBackend {
        let post_processor = match self.post_processor {
            Some(processor) => processor,
            None => {
                let processor = match self.input_shape[..] {
                    [_, _, h, w] => YoloPostProcessor::default().with_input_size(w, h),
                    _ => YoloPostProcessor::default(),
                };
                Box::new(processor)
            }
        };

        OrtBackend {
            session: None,
            input_name: DEFAULT_INPUT_NAME.to_string(),
            input_shape: self.input_shape,
            confidence_threshold: self.confidence_threshold,
            post_processor,
            class_names: self.class_names.clone().unwrap_or_else(ClassNames::coco),
            fallback_names: self.class_names,
            device: self.device,
            intra_threads: self.intra_threads,
        }
    }
}

impl Default for OrtBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}
