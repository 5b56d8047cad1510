mod plant;
mod session;

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use controller_core::commands::CommandSource;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use session::Session;

/// Pause between controller passes.
const PASS_INTERVAL: Duration = Duration::from_millis(1);

/// Period of the emulated supervisory `otp_okay`.
const AUTO_OKAY_INTERVAL: Duration = Duration::from_secs(1);

/// Prefix routing a typed line to the debug link instead of the host link.
const DEBUG_PREFIX: char = '!';

struct Options {
    auto_okay: bool,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: controller-emulator [--auto-okay] [--transcript <path>]");
        process::exit(2);
    });

    let mut session = Session::new(options.transcript.as_deref())?;
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(
        writer,
        "Flow rig emulator ready. Lines go to the host link, `{DEBUG_PREFIX}line` to the debug link."
    )?;
    writeln!(writer, "`status` shows the simulated rig, `exit` quits.")?;

    terminal::enable_raw_mode()?;
    let result = run(&mut session, &options, &mut writer);
    terminal::disable_raw_mode()?;
    result
}

fn run<W: Write>(session: &mut Session, options: &Options, writer: &mut W) -> io::Result<()> {
    let mut input = String::new();
    let mut last_okay = Instant::now();
    prompt(writer, &input)?;

    loop {
        while event::poll(Duration::ZERO)? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            match handle_key(key, &mut input) {
                KeyOutcome::Pending => prompt(writer, &input)?,
                KeyOutcome::Quit => {
                    write!(writer, "\r\nSession closed.\r\n")?;
                    return Ok(());
                }
                KeyOutcome::Line(line) => {
                    write!(writer, "\r\n")?;
                    if should_terminate(&line) {
                        write!(writer, "Session closed.\r\n")?;
                        return Ok(());
                    }
                    if line.eq_ignore_ascii_case("status") {
                        write!(writer, "{}\r\n", session.status_line())?;
                    } else if !line.is_empty() {
                        let (source, text) = route(&line);
                        print_lines(writer, &session.submit(source, text)?)?;
                    }
                    prompt(writer, &input)?;
                }
            }
        }

        if options.auto_okay && last_okay.elapsed() >= AUTO_OKAY_INTERVAL {
            last_okay = Instant::now();
            session.submit(CommandSource::Host, "otp_okay")?;
        }

        let output = session.tick()?;
        if !output.is_empty() {
            write!(writer, "\r\x1b[2K")?;
            print_lines(writer, &output)?;
            prompt(writer, &input)?;
        }

        thread::sleep(PASS_INTERVAL);
    }
}

enum KeyOutcome {
    Pending,
    Line(String),
    Quit,
}

fn handle_key(key: KeyEvent, input: &mut String) -> KeyOutcome {
    if key.kind == KeyEventKind::Release {
        return KeyOutcome::Pending;
    }
    match key.code {
        KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            KeyOutcome::Quit
        }
        KeyCode::Char(ch) => {
            input.push(ch);
            KeyOutcome::Pending
        }
        KeyCode::Backspace => {
            input.pop();
            KeyOutcome::Pending
        }
        KeyCode::Enter => KeyOutcome::Line(std::mem::take(input).trim().to_string()),
        KeyCode::Esc => KeyOutcome::Quit,
        _ => KeyOutcome::Pending,
    }
}

fn route(line: &str) -> (CommandSource, &str) {
    match line.strip_prefix(DEBUG_PREFIX) {
        Some(rest) => (CommandSource::Debug, rest.trim_start()),
        None => (CommandSource::Host, line),
    }
}

fn prompt<W: Write>(writer: &mut W, input: &str) -> io::Result<()> {
    write!(writer, "\r\x1b[2K> {input}")?;
    writer.flush()
}

fn print_lines<W: Write>(writer: &mut W, lines: &[String]) -> io::Result<()> {
    for line in lines {
        write!(writer, "{line}\r\n")?;
    }
    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        auto_okay: false,
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--auto-okay" {
            options.auto_okay = true;
        } else if let Some(value) = arg.strip_prefix("--transcript=") {
            options.transcript = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --transcript".to_string())?;
            options.transcript = Some(PathBuf::from(value));
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }
    Ok(options)
}
