use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hush_core::{
    Engine, EngineConfig, MasterState, RenderGraph, SharedGraph, Soundscape, Transport,
};
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const USAGE: &str =
    "usage: hush-native [soundscape] [--volume V] [--fade S] [--warm] [--heartbeat] [--sleep MINUTES]";
const LOOP_PERIOD: Duration = Duration::from_millis(20);

#[derive(Debug, PartialEq)]
struct Options {
    soundscape: Option<Soundscape>,
    settings: MasterState,
    sleep: Option<Duration>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Options> {
    let mut options = Options {
        soundscape: None,
        settings: MasterState::default(),
        sleep: None,
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--volume" => options.settings.volume = value(&mut args, "--volume")?,
            "--fade" => options.settings.fade_secs = value(&mut args, "--fade")?,
            "--warm" => options.settings.warmth = true,
            "--heartbeat" => options.settings.heartbeat = true,
            "--sleep" => {
                let minutes: f64 = value(&mut args, "--sleep")?;
                if !minutes.is_finite() || minutes <= 0.0 {
                    bail!("--sleep needs a positive number of minutes");
                }
                options.sleep = Some(Duration::from_secs_f64(minutes * 60.0));
            }
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            name => {
                if options.soundscape.is_some() {
                    bail!("only one soundscape can play at a time\n{USAGE}");
                }
                options.soundscape = Some(name.parse()?);
            }
        }
    }
    Ok(options)
}

fn value<T, I>(args: &mut I, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    I: Iterator<Item = String>,
{
    let raw = args.next().ok_or_else(|| anyhow!("{flag} needs a value"))?;
    raw.parse()
        .with_context(|| format!("invalid value {raw:?} for {flag}"))
}

#[derive(Debug, PartialEq)]
enum Command {
    Play(Soundscape),
    Pause,
    Stop { fade_out: bool },
    Volume(f32),
    Mute(bool),
    Warm(bool),
    Fade(f64),
    Heart(bool),
    Status,
    List,
    Quit,
}

fn on_off(word: Option<&str>) -> Result<bool> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => bail!("expected on|off"),
    }
}

fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let rest = words.next();
    let command = match verb {
        "play" => {
            let id = rest.ok_or_else(|| anyhow!("play <soundscape>"))?;
            Command::Play(id.parse()?)
        }
        "pause" => Command::Pause,
        "stop" => Command::Stop {
            fade_out: rest != Some("now"),
        },
        "volume" => {
            let v = rest.ok_or_else(|| anyhow!("volume <0..1>"))?;
            Command::Volume(v.parse()?)
        }
        "mute" => Command::Mute(on_off(rest)?),
        "warm" => Command::Warm(on_off(rest)?),
        "fade" => Command::Fade(rest.ok_or_else(|| anyhow!("fade <seconds>"))?.parse()?),
        "heart" => Command::Heart(on_off(rest)?),
        "status" => Command::Status,
        "list" => Command::List,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command {other:?}"),
    };
    Ok(command)
}

fn apply(engine: &mut Engine<SharedGraph>, command: Command) {
    match command {
        Command::Play(id) => engine.play(id),
        Command::Pause => engine.pause(),
        Command::Stop { fade_out } => engine.stop_all(fade_out, false),
        Command::Volume(v) => engine.set_volume(v),
        Command::Mute(on) => engine.toggle_mute(on),
        Command::Warm(on) => engine.set_warmth(on),
        Command::Fade(secs) => engine.set_fade_time(secs),
        Command::Heart(on) => engine.toggle_heartbeat_layer(on),
        Command::Status => {
            let s = engine.settings();
            println!(
                "{} | volume {:.2}{} | fade {:.1}s | warm {} | heart {}",
                engine.state(),
                s.volume,
                if s.muted { " (muted)" } else { "" },
                s.fade_secs,
                if s.warmth { "on" } else { "off" },
                if s.heartbeat { "on" } else { "off" },
            );
        }
        Command::List => {
            for id in Soundscape::ALL {
                println!("{id}");
            }
        }
        Command::Quit => {}
    }
}

/// Lines typed on stdin, read on their own thread so the control loop never
/// blocks.
fn spawn_console() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let options = parse_args(std::env::args().skip(1))?;

    let (graph, _stream) = match start_output() {
        Ok((graph, stream)) => (graph, Some(stream)),
        Err(e) => {
            log::warn!("no audio output ({e:#}); running silent");
            (SharedGraph::new(RenderGraph::unavailable()), None)
        }
    };
    let mut engine =
        Engine::with_config(graph, EngineConfig::default(), options.settings);
    if let Some(id) = options.soundscape {
        engine.play(id);
    }

    let console = spawn_console()?;
    let mut console_open = true;
    let deadline = options.sleep.map(|d| Instant::now() + d);
    let mut asleep = false;
    println!(
        "commands: play <id>, pause, stop [now], volume <v>, mute on|off, warm on|off, \
         fade <s>, heart on|off, status, list, quit"
    );

    loop {
        if console_open {
            match console.recv_timeout(LOOP_PERIOD) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => apply(&mut engine, command),
                    Err(e) => println!("{e}"),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => console_open = false,
            }
        } else {
            thread::sleep(LOOP_PERIOD);
        }

        if let Some(at) = deadline {
            if !asleep && Instant::now() >= at {
                log::info!("sleep timer elapsed, fading out");
                engine.stop_all(true, true);
                asleep = true;
            }
        }
        engine.tick();

        let idle = engine.state() == Transport::Idle && engine.tracked_node_count() == 0;
        if asleep && idle {
            break;
        }
    }

    engine.stop_all(false, false);
    log::info!("bye");
    Ok(())
}

// ---------------- Native audio (cpal) ----------------

fn start_output() -> Result<(SharedGraph, cpal::Stream)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))?;
    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;
    let graph = SharedGraph::new(RenderGraph::new(sample_rate));

    let err_fn = |err: cpal::StreamError| log::error!("audio stream error: {err}");

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream_f32(&device, &config.into(), channels, graph.clone(), err_fn)?
        }
        cpal::SampleFormat::I16 => {
            build_stream_i16(&device, &config.into(), channels, graph.clone(), err_fn)?
        }
        cpal::SampleFormat::U16 => {
            build_stream_u16(&device, &config.into(), channels, graph.clone(), err_fn)?
        }
        other => bail!("unsupported sample format {other:?}"),
    };

    stream.play()?;
    log::info!("output stream at {sample_rate} Hz, {channels} channels");
    Ok((graph, stream))
}

fn build_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    graph: SharedGraph,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [f32], _| {
            graph.render(data, channels);
            for s in data.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        },
        err_fn,
        None,
    )
}

fn build_stream_i16(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    graph: SharedGraph,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let mut scratch = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [i16], _| {
            scratch.resize(data.len(), 0.0_f32);
            graph.render(&mut scratch, channels);
            for (out, s) in data.iter_mut().zip(&scratch) {
                *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            }
        },
        err_fn,
        None,
    )
}

fn build_stream_u16(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    graph: SharedGraph,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let mut scratch = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [u16], _| {
            scratch.resize(data.len(), 0.0_f32);
            graph.render(&mut scratch, channels);
            for (out, s) in data.iter_mut().zip(&scratch) {
                *out = ((s.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32) as u16;
            }
        },
        err_fn,
        None,
    )
}
