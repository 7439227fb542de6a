use clap::Parser;

/// Generate a narrated short video about an animal.
#[derive(Parser, Debug)]
pub struct Args {
    /// Animal to feature; picked at random from --names-file when omitted.
    pub subject: Option<String>,

    /// Piper speaker id for multi-speaker voices.
    #[clap(long)]
    pub speaker: Option<String>,

    #[clap(long, default_value = "720x1280")]
    pub output_resolution: String,

    #[clap(long, default_value_t = 15)]
    pub fps: u32,

    #[clap(long, default_value = "./tts/en_US-hfc_male-medium.onnx")]
    pub piper_model: String,

    #[clap(long, default_value = "piper")]
    pub piper_bin: String,

    #[clap(long, default_value = "ffmpeg")]
    pub ffmpeg_bin: String,

    #[clap(long, default_value = "ffprobe")]
    pub ffprobe_bin: String,

    #[clap(long, default_value = "animal_names.json")]
    pub names_file: String,

    #[clap(long, default_value = "used_animals.txt")]
    pub used_file: String,

    #[clap(long, default_value = "output_images")]
    pub image_dir: String,

    #[clap(long, default_value = "output_audio")]
    pub audio_dir: String,

    #[clap(long, default_value = "output_video")]
    pub video_dir: String,

    #[clap(long, default_value = ".cache")]
    pub cache_dir: String,

    /// Concurrent image downloads.
    #[clap(long, default_value_t = 8)]
    pub concurrency: usize,

    /// Minimum narration and video length in seconds.
    #[clap(long, default_value_t = 30.0)]
    pub min_duration: f64,

    #[clap(long, default_value = "google/gemma-3n-e4b-it:free")]
    pub model: String,

    #[clap(long, default_value_t = 3)]
    pub delivery_attempts: u32,

    /// Delay before the first delivery retry in seconds; doubles each retry.
    #[clap(long, default_value_t = 1.0)]
    pub retry_base_delay: f64,

    /// Drop every cached description and image search before running.
    #[clap(long)]
    pub clear_cache: bool,

    #[clap(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    #[clap(long, env = "UNSPLASH_ACCESS_KEY", hide_env_values = true)]
    pub unsplash_access_key: Option<String>,

    #[clap(long, env = "WHATSAPP_CHAT_ID")]
    pub whatsapp_chat_id: Option<String>,

    #[clap(long, env = "UPLOAD_URL", default_value = "https://tmpfiles.org/api/v1/upload")]
    pub upload_url: String,

    #[clap(
        long,
        env = "WHATSAPP_BRIDGE_URL",
        default_value = "http://127.0.0.1:3000/client/sendMessage/ABCD"
    )]
    pub bridge_url: String,
}
