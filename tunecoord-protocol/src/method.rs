//! Engine method names used by the coordinator.

pub const PLAYER_PLAY: &str = "Player.play";
pub const PLAYER_STOP: &str = "Player.stop";
pub const PLAYER_PAUSE: &str = "Player.pause";
pub const PLAYER_RESUME: &str = "Player.resume";
pub const PLAYER_SEEK_TO: &str = "Player.seekTo";
pub const PLAYER_SET_PLAY_SPEED: &str = "Player.setPlaySpeed";
pub const PLAYER_SET_MUTE: &str = "Player.setMute";
pub const PLAYER_GET_STATUS: &str = "Player.getStatus";
pub const PLAYER_SET_AUDIO_STREAM: &str = "Player.setAudioStream";
pub const PLAYER_SET_SUBTITLE_STREAM: &str = "Player.setSubtitleStream";
pub const PLAYER_SET_SUBTITLES_ON: &str = "Player.setSubtitlesOn";
pub const PLAYER_LIST_AUDIO_STREAMS: &str = "Player.getListOfAudioStreams";
pub const PLAYER_LIST_SUBTITLE_STREAMS: &str = "Player.getListOfSubtitleStreams";
pub const PLAYER_GET_RATING_AGE: &str = "Player.getCurrentProgramRatingAge";

pub const PLAYER_START_TIMESHIFT: &str = "Player.startTimeshiftRecording";
pub const PLAYER_STOP_TIMESHIFT: &str = "Player.stopTimeshiftRecording";
pub const PLAYER_PLAY_TIMESHIFT: &str = "Player.playTimeshiftRecording";
pub const PLAYER_GET_TIMESHIFT_STATUS: &str = "Player.getTimeshiftRecorderStatus";
pub const PLAYER_SET_TIMESHIFT_BUFFER: &str = "Player.setTimeshiftBufferSize";

pub const RECORDING_TUNE: &str = "Recording.tune";
pub const RECORDING_UNTUNE: &str = "Recording.unTune";
pub const RECORDING_START: &str = "Recording.startRecording";
pub const RECORDING_STOP: &str = "Recording.stopRecording";
pub const RECORDING_CHECK_AVAILABILITY: &str = "Recording.checkAvailability";
pub const RECORDING_GET_STATUS: &str = "Recording.getStatus";
pub const RECORDING_NUM_RECORDERS: &str = "Recording.getNumberOfRecorders";
pub const RECORDING_LIST_SCHEDULED: &str = "Recording.getListOfScheduledRecordings";
pub const RECORDING_REMOVE_SCHEDULED: &str = "Recording.removeScheduledRecording";

pub const DVB_GET_FRONTEND: &str = "Dvb.getFrontend";
pub const DVB_RESOLVE_SERVICE: &str = "Dvb.resolveService";
