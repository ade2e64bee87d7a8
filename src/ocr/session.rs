use std::path::{Path, PathBuf};

use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

pub(crate) const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

/// Runtime settings shared by every model session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub threads: usize,
    pub execution_providers: Vec<ExecutionProvider>,
    /// Where TensorRT keeps built engines. Defaults to `.cache` next to the model.
    pub cache_path: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
            cache_path: None,
        }
    }
}

/// TensorRT optimisation profile for the model input, e.g. `x:1x3x48x1`.
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "tensorrt"), allow(dead_code))]
pub(crate) struct ShapeProfile {
    pub min: String,
    pub opt: String,
    pub max: String,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, profile: &ShapeProfile) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(profile.min.clone())
        .with_profile_max_shapes(profile.max.clone())
        .with_profile_opt_shapes(profile.opt.clone())
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    ort::CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    ort::DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    ort::CoreMLExecutionProvider::default().build()
}

#[instrument(level = "debug", skip(options, profile))]
#[cfg_attr(not(feature = "tensorrt"), allow(unused_variables))]
pub(crate) fn build_session(
    path: &Path,
    options: &SessionOptions,
    profile: ShapeProfile,
) -> ort::Result<Session> {
    // DirectML cannot run with memory patterns or parallel execution enabled.
    #[cfg(feature = "directml")]
    let parallel = !options
        .execution_providers
        .contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    let providers = options.execution_providers.iter().filter_map(
        |provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => {
                    let cache_path = options.cache_path.clone().unwrap_or_else(|| {
                        path.parent()
                            .map_or_else(|| PathBuf::from(".cache"), |dir| dir.join(".cache"))
                    });
                    Some(setup_tensorrt(cache_path, &profile))
                }
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(setup_coreml()),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(setup_cuda()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => Some(setup_directml()),
            }
        },
    );

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(parallel)?
        .with_parallel_execution(parallel)?
        .with_inter_threads(options.threads)?
        .with_intra_threads(options.threads)?
        .with_execution_providers(providers)?
        .commit_from_file(path)?;

    log::debug!("{} inputs: {:?}", path.display(), session.inputs);
    log::debug!("{} outputs: {:?}", path.display(), session.outputs);
    Ok(session)
}
