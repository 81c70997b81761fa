//! Interactive stdin controls for a running pipeline.

use std::io::{self, BufRead};

use streamblur::effect::EffectConfig;
use streamblur::Pipeline;

/// Intensity change per `+`/`-`
const INTENSITY_STEP: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    IntensityUp,
    IntensityDown,
    CycleEffect,
    SelectDevice(u32),
    ListDevices,
    Stats,
    Help,
    Quit,
}

pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Err("empty command".into());
    };
    let command = match word {
        "+" | "=" => Command::IntensityUp,
        "-" | "_" => Command::IntensityDown,
        "k" => Command::CycleEffect,
        "d" => {
            let id = words.next().ok_or("usage: d <camera id>")?;
            let id = id
                .parse()
                .map_err(|_| format!("'{}' is not a camera id", id))?;
            Command::SelectDevice(id)
        }
        "l" => Command::ListDevices,
        "s" => Command::Stats,
        "h" | "?" => Command::Help,
        "q" => Command::Quit,
        other => return Err(format!("unknown command '{}', h for help", other)),
    };
    if words.next().is_some() {
        return Err(format!("trailing input after '{}'", word));
    }
    Ok(command)
}

impl Command {
    fn edits_effect(self) -> bool {
        matches!(
            self,
            Command::IntensityUp | Command::IntensityDown | Command::CycleEffect
        )
    }
}

/// Effect after applying `command`; other commands leave it as is
pub fn adjusted(config: &EffectConfig, command: Command) -> EffectConfig {
    let config = config.clone();
    match command {
        Command::IntensityUp => {
            let intensity = config.intensity().saturating_add(INTENSITY_STEP);
            config.with_intensity(intensity)
        }
        Command::IntensityDown => {
            let intensity = config.intensity().saturating_sub(INTENSITY_STEP);
            config.with_intensity(intensity)
        }
        Command::CycleEffect => {
            let kind = config.kind().next();
            config.with_kind(kind)
        }
        _ => config,
    }
}

fn print_help() {
    println!("Commands:");
    println!("  + / -     raise / lower intensity");
    println!("  k         next effect");
    println!("  d <id>    switch camera");
    println!("  l         list cameras");
    println!("  s         show stats");
    println!("  q         quit");
}

/// Read commands until `q` or end of input, then stop the pipeline
pub fn run(pipeline: &Pipeline) {
    print_help();
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        if command.edits_effect() {
            let config = pipeline.update_effect(|current| adjusted(current, command));
            println!("{} at intensity {}", config.kind(), config.intensity());
            continue;
        }
        match command {
            Command::SelectDevice(id) => pipeline.select_device(id),
            Command::ListDevices => match pipeline.devices() {
                Ok(devices) => {
                    for device in devices {
                        println!("  {}: {}", device.id, device.name);
                    }
                }
                Err(e) => println!("Cannot list cameras: {}", e),
            },
            Command::Stats => println!("{} | {}", pipeline.state(), pipeline.stats()),
            Command::Help => print_help(),
            Command::Quit => break,
            _ => {}
        }
        if pipeline.state().is_terminal() {
            break;
        }
    }
    pipeline.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamblur::effect::{EffectKind, MAX_INTENSITY, MIN_INTENSITY};

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("+"), Ok(Command::IntensityUp));
        assert_eq!(parse(" - "), Ok(Command::IntensityDown));
        assert_eq!(parse("k"), Ok(Command::CycleEffect));
        assert_eq!(parse("d 2"), Ok(Command::SelectDevice(2)));
        assert_eq!(parse("l"), Ok(Command::ListDevices));
        assert_eq!(parse("s"), Ok(Command::Stats));
        assert_eq!(parse("q"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse("").is_err());
        assert!(parse("d").is_err());
        assert!(parse("d cam").is_err());
        assert!(parse("q now").is_err());
        assert!(parse("x").is_err());
    }

    #[test]
    fn test_intensity_steps_stay_in_range() {
        let config = EffectConfig::new(EffectKind::GaussianBlur, 20);
        let up = adjusted(&config, Command::IntensityUp);
        assert_eq!(up.intensity(), 22);
        let down = adjusted(&config, Command::IntensityDown);
        assert_eq!(down.intensity(), 18);

        let top = EffectConfig::new(EffectKind::GaussianBlur, MAX_INTENSITY);
        assert_eq!(adjusted(&top, Command::IntensityUp).intensity(), MAX_INTENSITY);
        let bottom = EffectConfig::new(EffectKind::GaussianBlur, MIN_INTENSITY);
        assert_eq!(
            adjusted(&bottom, Command::IntensityDown).intensity(),
            MIN_INTENSITY
        );
    }

    #[test]
    fn test_cycle_keeps_intensity() {
        let config = EffectConfig::new(EffectKind::ChromaKey, 30);
        let next = adjusted(&config, Command::CycleEffect);
        assert_eq!(next.kind(), EffectKind::GaussianBlur);
        assert_eq!(next.intensity(), 30);
        assert!(Command::CycleEffect.edits_effect());
        assert!(!Command::Stats.edits_effect());
        assert_eq!(adjusted(&config, Command::Stats).kind(), EffectKind::ChromaKey);
    }
}
