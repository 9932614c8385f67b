//! camflow recording
//
// Everything behind the record button:
// - the bridge thread that redraws the composed frame onto an encoder surface
// - encoder drain threads and the muxer they share
// - the recorder controller that opens, starts and finalizes one recording
//
// Platform codecs plug in through the traits in `codec` and `MediaBackend`; `raw` is the
// portable fallback that records uncompressed frames read back from GL.
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bridge;
pub mod codec;
pub mod container;
pub mod encoder;
pub mod error;
pub mod muxer;
pub mod pts;
pub mod raw;
pub mod recorder;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{GpuBlitTarget, Present, RecordBridge, RecordTarget, RecordTargetFactory};
pub use codec::{
    AudioSource, DrainStatus, EncodedSample, EncoderCodec, EncoderKind, MuxerWriter, PcmInput,
    TrackFormat, AUDIO_MIME, VIDEO_MIME,
};
pub use container::{read_framed, FramedFileWriter, FramedSample};
pub use encoder::{
    AudioEncoder, EncoderContext, EncoderEvent, EncoderHandle, FrameGate, MediaEncoder,
    SAMPLES_PER_FRAME,
};
pub use error::RecordError;
pub use muxer::MuxerCoordinator;
pub use pts::PtsCorrector;
pub use raw::{
    raw_video_channel, RawBackend, RawFrameSink, RawVideoCodec, ReadbackTarget, TargetMaker,
    RAW_QUEUE_DEPTH, RAW_VIDEO_MIME,
};
pub use recorder::{
    AudioInput, MediaBackend, RecordSession, Recorder, RecorderEvent, VideoInput,
};
