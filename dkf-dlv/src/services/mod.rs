//! Service modules for the delivery pipeline
//!
//! Leaf-first: path and sequence rules, indexing and search, the streaming
//! copier and router, then the job pipeline and its post-processing.

pub mod categorizer;
pub mod docket_indexer;
pub mod docket_metadata;
pub mod duration_probe;
pub mod file_copier;
pub mod fuzzy_search;
pub mod job_pipeline;
pub mod path_config;
pub mod prep_summary;
pub mod prep_watcher;
pub mod sequence_allocator;
pub mod stem_organizer;
pub mod video_conversion;

pub use categorizer::FileCategory;
pub use docket_indexer::{DocketIndexer, DomainIndex};
pub use docket_metadata::{DocketInfo, DocketMetadataProvider, FolderNameMetadata};
pub use duration_probe::{DurationProbe, FfprobeDurationProbe, ProbeError};
pub use file_copier::{copy_file, CopyError, CopyLimits, CopyOutcome};
pub use fuzzy_search::{FuzzySearchEngine, SearchResults};
pub use job_pipeline::{
    ChannelTranscodeDecider, FixedTranscodeDecision, JobPipeline, PipelineError, Preflight,
    TranscodeDecider,
};
pub use path_config::{DocketLocation, PathConfig};
pub use prep_summary::PrepSummaryGenerator;
pub use prep_watcher::{ActiveDockets, PrepWatchRegistry, SummaryRegenerator, WatchError};
pub use stem_organizer::StemGroup;
pub use video_conversion::{
    ConversionError, ConversionId, ConversionNaming, ConversionProgress, ConversionRequest,
    FfmpegConversionService, VideoConversionService,
};
