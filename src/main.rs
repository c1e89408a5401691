use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use voice_chat::voice::{
    AudioCapture, AudioPlayback, MicTranscriptSource, PLAYBACK_SAMPLE_RATE, Speaker,
    SpeechToText, TextToSpeech, decode_mp3, rms_energy,
};
use voice_chat::{
    Config, Engine, EngineEvent, EngineHandle, EngineState, Error, OpenAiChatClient, RelayServer,
    RelistenPolicy, Role,
};

/// Voice Chat - talk to a chat model, hands free
#[derive(Parser)]
#[command(name = "voice-chat", version, about)]
struct Cli {
    /// `OpenAI` API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat model
    #[arg(short, long)]
    model: Option<String>,

    /// Seconds of silence that end an utterance
    #[arg(long)]
    debounce: Option<f64>,

    /// Port for the command relay
    #[arg(long)]
    relay_port: Option<u16>,

    /// Don't serve the command relay
    #[arg(long)]
    no_relay: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Report audio device availability
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voice_chat=info",
        1 => "info,voice_chat=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli);

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Devices => {
                devices();
                Ok(())
            }
        };
    }

    if !config.has_api_key() {
        anyhow::bail!("{}", Error::Config(String::new()).user_message());
    }

    tracing::info!(
        model = %config.chat.model,
        debounce_ms = config.turns.debounce.as_millis(),
        relay = config.relay.enabled,
        "starting voice chat"
    );

    let stt = SpeechToText::with_base_url(
        config.api_key_secret(),
        config.voice.stt_model.clone(),
        config.voice.language.clone(),
        &config.chat.base_url,
    )?;
    let tts = TextToSpeech::new(
        config.api_key_secret(),
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?
    .with_base_url(&config.chat.base_url);
    let chat = OpenAiChatClient::new(
        config.api_key_secret(),
        config.chat.model.clone(),
        &config.chat.base_url,
    );

    let engine = Engine::spawn(
        config.engine_config(),
        Arc::new(MicTranscriptSource::new(
            stt,
            config.voice.partial_interval,
            config.voice.speech_threshold,
        )),
        Arc::new(chat),
        Arc::new(Speaker::new(tts)),
    );

    let relay = config
        .relay
        .enabled
        .then(|| RelayServer::new(engine.clone(), config.relay.port).spawn());

    if config.turns.relisten == RelistenPolicy::DuringPlayback {
        println!(
            "Listening continues while replies play; use headphones so the microphone \
             does not pick up the assistant (or set relisten = \"after_playback\")."
        );
    }
    println!("Commands: start, stop, history, quit");
    let printer = tokio::spawn(print_events(engine.subscribe()));

    interactive(&engine).await?;

    engine.shutdown().await;
    printer.abort();
    if let Some(relay) = relay {
        relay.abort();
    }

    Ok(())
}

/// Apply CLI overrides on top of env and file configuration
fn load_config(cli: &Cli) -> Config {
    let mut config = Config::load();

    if let Some(key) = &cli.api_key {
        config.api_key = Some(key.clone().into());
    }
    if let Some(model) = &cli.model {
        config.chat.model.clone_from(model);
    }
    if let Some(secs) = cli.debounce {
        match Duration::try_from_secs_f64(secs) {
            Ok(debounce) if !debounce.is_zero() => config.turns.debounce = debounce,
            _ => tracing::warn!(secs, "ignoring invalid --debounce"),
        }
    }
    if let Some(port) = cli.relay_port {
        config.relay.port = port;
    }
    if cli.no_relay {
        config.relay.enabled = false;
    }

    config
}

/// Read control commands from stdin until `quit` or EOF
async fn interactive(engine: &EngineHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "start" | "s" => engine.start().await?,
            "stop" | "x" => engine.stop().await?,
            "history" | "h" => {
                for turn in engine.conversation().await? {
                    if turn.role != Role::System {
                        println!("{:>9}: {}", turn.role.as_str(), turn.content);
                    }
                }
            }
            "quit" | "q" | "exit" => break,
            other => println!("Unknown command: {other} (start, stop, history, quit)"),
        }
    }

    Ok(())
}

/// Print engine events for the person at the terminal
async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::StateChanged { state }) => match state {
                EngineState::Listening => println!("[listening]"),
                EngineState::AwaitingCompletion => println!("[thinking]"),
                EngineState::Speaking | EngineState::Idle => {}
            },
            Ok(EngineEvent::Transcript { text }) => println!("  ... {text}"),
            Ok(EngineEvent::TurnAppended { turn }) => match turn.role {
                Role::User => println!("You: {}", turn.content),
                Role::Assistant => println!("Assistant: {}", turn.content),
                Role::System => {}
            },
            Ok(EngineEvent::Error { message, .. }) => eprintln!("{message}"),
            Ok(EngineEvent::UtteranceFinalized { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Report whether input and output devices are present
fn devices() {
    let input = AudioCapture::input_available();
    let output = AudioPlayback::output_available();

    println!("Microphone: {}", if input { "available" } else { "not found" });
    println!("Speaker:    {}", if output { "available" } else { "not found" });

    if !input {
        println!("\n{}", Error::RecognitionUnavailable(String::new()).user_message());
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    // cpal streams are not Send, so the capture lives on its own thread
    let meter = tokio::task::spawn_blocking(move || -> voice_chat::Result<()> {
        let mut capture = AudioCapture::new()?;
        capture.start()?;
        println!("---");

        for i in 0..duration {
            std::thread::sleep(Duration::from_secs(1));

            let samples = capture.take_buffer();
            let energy = rms_energy(&samples);
            let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
        }

        capture.stop();
        Ok(())
    });
    meter.await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    tokio::task::spawn_blocking(move || AudioPlayback::new()?.play(samples)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output via the speech API
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = TextToSpeech::new(
        config.api_key_secret(),
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?
    .with_base_url(&config.chat.base_url);

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    tokio::task::spawn_blocking(move || {
        let samples = decode_mp3(&mp3_data)?;
        AudioPlayback::new()?.play(samples)
    })
    .await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
