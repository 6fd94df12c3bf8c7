//! CLI binary for pyvidhya.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pyvidhya::lesson::curriculum::Position;
use pyvidhya::lesson::{TestCase, check_success_criteria};
use pyvidhya::runner::CodeRunner as _;
use pyvidhya::stt::CommandRecognizer;
use pyvidhya::tts::engine;
use pyvidhya::tts::voice::select_voice;
use pyvidhya::{
    Command as SessionCommand, Curriculum, Direction, HttpTutorClient, LessonConfig,
    LessonSession, PythonRunner, SessionDriver, SessionEvent, SessionInputs, TutorResponse,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Pyvidhya: learn Python with a friendly AI tutor.
#[derive(Parser)]
#[command(name = "pyvidhya", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start an interactive lesson.
    Learn,

    /// Run a Python file against an episode's success tests.
    Check {
        /// Python source file.
        file: PathBuf,
        /// Chapter number (1-based).
        #[arg(long, default_value_t = 1)]
        chapter: usize,
        /// Episode number (1-based).
        #[arg(long, default_value_t = 1)]
        episode: usize,
    },

    /// List synthesizer voices and the one chosen for the configured language.
    Voices,

    /// Print the course outline.
    Curriculum,

    /// Write the default configuration file.
    InitConfig,
}

const HELP: &str = "\
Commands:
  /run              run the code in the editor
  /edit             replace the editor code (finish with a line containing /end)
  /next, /prev      move between episodes
  /do N             perform action N of the tutor's last reply
  /lang TAG         speak in another language (e.g. hi-IN)
  /tts on|off       turn speech on or off
  /voice female|any voice preference
  /stop             stop speaking
  /mic on|off       dictate a message; it is sent when the mic turns off
  /chat             collapse or expand the chat panel
  /quit             leave the lesson
Anything else is sent to the tutor.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the lesson on stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pyvidhya=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(LessonConfig::default_config_path);
    let config = load_config(&config_path, cli.config.is_some())?;

    match cli.command.unwrap_or(Command::Learn) {
        Command::Learn => run_lesson(config).await,
        Command::Check {
            file,
            chapter,
            episode,
        } => check_file(config, &file, chapter, episode).await,
        Command::Voices => list_voices(&config).await,
        Command::Curriculum => print_curriculum(&config),
        Command::InitConfig => {
            LessonConfig::default().save_to_file(&config_path)?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
    }
}

/// An explicitly named config file must exist; the default one is optional.
fn load_config(path: &Path, explicit: bool) -> anyhow::Result<LessonConfig> {
    if explicit || path.exists() {
        LessonConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))
    } else {
        Ok(LessonConfig::default())
    }
}

async fn run_lesson(config: LessonConfig) -> anyhow::Result<()> {
    println!("Pyvidhya v{}", env!("CARGO_PKG_VERSION"));

    let curriculum = Curriculum::load(&config.curriculum)?;
    let tutor = Arc::new(HttpTutorClient::new(config.tutor.clone())?);

    let runner = Arc::new(PythonRunner::new(config.runner.clone()));
    let probe = Arc::clone(&runner);
    tokio::spawn(async move {
        if let Err(e) = probe.initialize().await {
            warn!(error = %e, "code runner unavailable");
        }
    });

    let (voices_tx, voices) = mpsc::channel(1);
    let program = config.tts.engine_command.clone();
    tokio::spawn(async move {
        match engine::list_voices(&program).await {
            Ok(found) => {
                let _ = voices_tx.send(found).await;
            }
            Err(e) => warn!(error = %e, "speech disabled: no synthesizer voices"),
        }
    });

    let (engine_tx, engine_events) = mpsc::unbounded_channel();
    let speech_engine = engine::CommandEngine::from_config(&config.tts, engine_tx);
    let (stt_tx, transcripts) = mpsc::unbounded_channel();
    let recognizer = CommandRecognizer::from_config(&config.stt, stt_tx);
    let mut session = LessonSession::new(config, curriculum, Box::new(speech_engine));
    if let Some(recognizer) = recognizer {
        session = session.with_recognizer(Box::new(recognizer));
    }
    let events = session.subscribe();
    print_banner(&session);

    let driver = SessionDriver::new(session, tutor, runner);
    let cancel = driver.cancel_token();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_on_signal.cancel();
        }
    });

    let (commands_tx, commands) = mpsc::channel(32);
    let driver = tokio::spawn(driver.run(SessionInputs {
        commands,
        engine_events,
        voices,
        transcripts,
    }));
    tokio::spawn(print_events(events));

    println!("{HELP}\n");
    tokio::select! {
        () = read_commands(spawn_stdin_reader(), commands_tx) => {}
        () = cancel.cancelled() => {}
    }

    let session = driver.await.context("session driver panicked")?;
    let context = session.context();
    println!(
        "\nBye! You earned {} coins over {} runs.",
        context.progress.coins, context.attempts
    );
    Ok(())
}

fn print_banner(session: &LessonSession) {
    let context = session.context();
    println!(
        "\nChapter {}: {}\nEpisode {}: {}\n",
        context.chapter_index + 1,
        context.chapter_title,
        context.episode_index + 1,
        context.episode_title
    );
    print_response(session.response());
    println!("--- editor ---\n{}\n--------------", context.editor_code);
}

/// Reads stdin on a plain thread; a blocked read must not hold up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Forwards learner input until EOF or `/quit`. Returning closes the
/// command channel, which ends the session.
async fn read_commands(
    mut lines: mpsc::Receiver<String>,
    commands: mpsc::Sender<SessionCommand>,
) {
    while let Some(line) = lines.recv().await {
        let line = line.trim();
        let command = match line {
            "" => SessionCommand::Interacted,
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{HELP}");
                continue;
            }
            "/edit" => {
                let mut code = Vec::new();
                while let Some(code_line) = lines.recv().await {
                    if code_line.trim() == "/end" {
                        break;
                    }
                    code.push(code_line);
                }
                SessionCommand::EditCode(code.join("\n"))
            }
            _ => match parse_command(line) {
                Some(command) => command,
                None => {
                    println!("Unknown command. Type /help for a list.");
                    continue;
                }
            },
        };
        if commands.send(command).await.is_err() {
            break;
        }
    }
}

/// Maps one input line to a session command.
fn parse_command(line: &str) -> Option<SessionCommand> {
    let Some(rest) = line.strip_prefix('/') else {
        return Some(SessionCommand::Chat(line.to_owned()));
    };
    let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let arg = arg.trim();
    match (name, arg) {
        ("run", _) => Some(SessionCommand::RunCode),
        ("next", _) => Some(SessionCommand::Navigate(Direction::Next)),
        ("prev", _) => Some(SessionCommand::Navigate(Direction::Prev)),
        ("stop", _) => Some(SessionCommand::StopSpeaking),
        ("chat", _) => Some(SessionCommand::ToggleChatPanel),
        ("do", n) => n
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(|n| SessionCommand::PerformAction(n - 1)),
        ("lang", tag) if !tag.is_empty() => Some(SessionCommand::SetLanguage(tag.to_owned())),
        ("tts", "on") => Some(SessionCommand::SetTtsEnabled(true)),
        ("tts", "off") => Some(SessionCommand::SetTtsEnabled(false)),
        ("mic", "on") => Some(SessionCommand::SetSttEnabled(true)),
        ("mic", "off") => Some(SessionCommand::SetSttEnabled(false)),
        ("voice", "female") => Some(SessionCommand::SetFemaleVoicePreferred(true)),
        ("voice", "any") => Some(SessionCommand::SetFemaleVoicePreferred(false)),
        _ => None,
    }
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "display fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            SessionEvent::TutorThinking { .. } => println!("(Pyvidhya is thinking...)"),
            SessionEvent::TutorResponded(response) => print_response(&response),
            SessionEvent::RunFinished {
                result,
                tests_passed,
            } => {
                println!("--- output ({} ms) ---", result.duration_ms);
                if !result.stdout.is_empty() {
                    println!("{}", result.stdout);
                }
                if !result.stderr.is_empty() {
                    println!("{}", result.stderr);
                }
                if tests_passed {
                    println!("All checks passed!");
                }
            }
            SessionEvent::Navigated {
                position,
                chapter_title,
                episode_title,
            } => println!(
                "\nChapter {}: {chapter_title}\nEpisode {}: {episode_title}\n",
                position.chapter + 1,
                position.episode + 1
            ),
            SessionEvent::StageChanged(stage) => println!("Stage: {stage}"),
            SessionEvent::CoinsAwarded { coins, total } => {
                println!("+{coins} coins (total {total})");
            }
            SessionEvent::Listening(true) => println!("(listening... /mic off to send)"),
            SessionEvent::Listening(false) => println!("(microphone off)"),
            SessionEvent::Transcript(text) => println!("  heard: {text}"),
            SessionEvent::Notice(text) => println!("{text}"),
        }
    }
}

fn print_response(response: &TutorResponse) {
    println!("\nPyvidhya: {}\n", response.reading_content);
    for item in &response.checklist {
        println!("  {item}");
    }
    for (i, action) in response.actions.iter().enumerate() {
        match action.message() {
            Some(message) => println!("  [{}] {}: {message}", i + 1, action.kind),
            None => println!("  [{}] {}", i + 1, action.kind),
        }
    }
    if !response.next_step.label.is_empty() {
        println!("Next: {}", response.next_step.label);
    }
}

async fn check_file(
    config: LessonConfig,
    file: &Path,
    chapter: usize,
    episode: usize,
) -> anyhow::Result<()> {
    let curriculum = Curriculum::load(&config.curriculum)?;
    let position = Position::new(chapter.saturating_sub(1), episode.saturating_sub(1));
    let Some(target) = curriculum.episode(position) else {
        anyhow::bail!("no episode {episode} in chapter {chapter}");
    };
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let runner = PythonRunner::new(config.runner);
    runner.initialize().await?;
    let result = runner.execute(&source).await;

    println!("{}", result.stdout);
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
    let passed = result.success && check_success_criteria(&result.stdout, &target.tests);
    for (name, ok) in verdicts(&result.stdout, &target.tests) {
        println!("{} {name}", if ok { "PASS" } else { "FAIL" });
    }
    if !passed {
        anyhow::bail!("\"{}\" checks did not pass", target.title);
    }
    println!("\"{}\": all checks passed", target.title);
    Ok(())
}

/// Pass or fail for each test on its own.
fn verdicts<'a>(stdout: &str, tests: &'a [TestCase]) -> Vec<(&'a str, bool)> {
    tests
        .iter()
        .map(|test| {
            let ok = check_success_criteria(stdout, std::slice::from_ref(test));
            (test.name.as_str(), ok)
        })
        .collect()
}

async fn list_voices(config: &LessonConfig) -> anyhow::Result<()> {
    let voices = engine::list_voices(&config.tts.engine_command).await?;
    for voice in &voices {
        println!("{:<12} {}", voice.language, voice.name);
    }
    match select_voice(
        &voices,
        &config.tts.language,
        config.tts.female_voice_preferred,
    ) {
        Some((voice, tier)) => println!(
            "\n{} would speak as {} ({tier:?})",
            config.tts.language, voice.name
        ),
        None => println!("\nNo voice available for {}", config.tts.language),
    }
    Ok(())
}

fn print_curriculum(config: &LessonConfig) -> anyhow::Result<()> {
    let curriculum = Curriculum::load(&config.curriculum)?;
    for (c, chapter) in curriculum.chapters.iter().enumerate() {
        println!("Chapter {}: {}", c + 1, chapter.title);
        for (e, episode) in chapter.episodes.iter().enumerate() {
            println!("  {}. {} ({} checks)", e + 1, episode.title, episode.tests.len());
        }
    }
    println!("\n{} episodes", curriculum.episode_count());
    Ok(())
}
