use crate::format::ts::types::{PID_AUDIO, PID_PMT, PID_VIDEO};

/// Segment layout settings.
///
/// The defaults reproduce the reference layout: program 1 mapped to PMT PID
/// 4096, H.264 video on PID 256 carrying the PCR, AAC audio on PID 257 when
/// enabled, and a PCR on every sample.
///
/// ```
/// use hlsmux::config::TsConfig;
///
/// let config = TsConfig::default().with_audio(true).with_pcr_interval(4);
/// assert_eq!(config.pmt_pid, 4096);
/// assert!(config.audio_enabled);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TsConfig {
    /// Transport stream id carried by the PAT
    pub transport_stream_id: u16,
    /// Program number shared by the PAT entry and the PMT
    pub program_number: u16,
    /// PID of the PMT packets
    pub pmt_pid: u16,
    /// PID of the video elementary stream, also the PCR PID
    pub video_pid: u16,
    /// PID of the audio elementary stream
    pub audio_pid: u16,
    /// Whether the PMT lists the audio stream and audio samples are muxed
    pub audio_enabled: bool,
    /// Samples skipped between two PCR-carrying samples
    pub pcr_interval: u32,
}

impl Default for TsConfig {
    fn default() -> Self {
        Self {
            transport_stream_id: 1,
            program_number: 1,
            pmt_pid: PID_PMT,
            video_pid: PID_VIDEO,
            audio_pid: PID_AUDIO,
            audio_enabled: false,
            pcr_interval: 0,
        }
    }
}

impl TsConfig {
    /// Enables or disables the audio elementary stream
    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    /// Sets the number of samples skipped between PCRs
    pub fn with_pcr_interval(mut self, interval: u32) -> Self {
        self.pcr_interval = interval;
        self
    }

    /// Overrides the PMT PID
    pub fn with_pmt_pid(mut self, pid: u16) -> Self {
        self.pmt_pid = pid;
        self
    }

    /// Overrides the elementary stream PIDs
    pub fn with_stream_pids(mut self, video_pid: u16, audio_pid: u16) -> Self {
        self.video_pid = video_pid;
        self.audio_pid = audio_pid;
        self
    }

    /// PID the PCR travels on
    pub fn pcr_pid(&self) -> u16 {
        self.video_pid
    }
}
