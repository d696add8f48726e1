pub mod transcription;
