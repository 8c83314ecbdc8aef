//! Line oriented command interpreter over one in-memory volume
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use flat_fs::{FlatFileSystem, FsConfig, FsError, Layout, RamDisk};

use crate::error::{ParseError, ShellError};
use crate::image::{load_image, save_image};

/// Largest disk `in` will allocate
const MAX_DISK_BYTES: usize = 1 << 30;

/// One parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init {
        cylinders: usize,
        surfaces: usize,
        sectors: usize,
        sector_size: usize,
        image: String,
    },
    Create(String),
    Destroy(String),
    Open(String),
    Close(usize),
    Read { handle: usize, count: usize },
    Write { handle: usize, fill: u8, count: usize },
    Seek { handle: usize, position: i64 },
    Dir,
    Save(String),
    Exit,
}

fn number<T: FromStr>(token: &str) -> Result<T, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::InvalidNumber(token.into()))
}

impl Command {
    /// Parse the whitespace separated tokens of one line
    pub fn parse(tokens: &[&str]) -> Result<Self, ParseError> {
        let (&name, args) = tokens.split_first().ok_or(ParseError::WrongCommand)?;
        let arity = match name {
            "dr" | "ex" => 0,
            "cr" | "de" | "op" | "cl" | "sv" => 1,
            "rd" | "sk" => 2,
            "wr" => 3,
            "in" => 5,
            _ => return Err(ParseError::WrongCommand),
        };
        if args.len() != arity {
            return Err(ParseError::WrongArgumentCount);
        }

        let command = match name {
            "in" => Self::Init {
                cylinders: number(args[0])?,
                surfaces: number(args[1])?,
                sectors: number(args[2])?,
                sector_size: number(args[3])?,
                image: args[4].into(),
            },
            "cr" => Self::Create(args[0].into()),
            "de" => Self::Destroy(args[0].into()),
            "op" => Self::Open(args[0].into()),
            "cl" => Self::Close(number(args[0])?),
            "rd" => Self::Read {
                handle: number(args[0])?,
                count: number(args[1])?,
            },
            "wr" => {
                let fill = match args[1].as_bytes() {
                    &[fill] => fill,
                    _ => return Err(ParseError::NotOneChar),
                };
                Self::Write {
                    handle: number(args[0])?,
                    fill,
                    count: number(args[2])?,
                }
            }
            "sk" => Self::Seek {
                handle: number(args[0])?,
                position: number(args[1])?,
            },
            "dr" => Self::Dir,
            "sv" => Self::Save(args[0].into()),
            _ => Self::Exit,
        };
        Ok(command)
    }
}

/// Whether the session goes on after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

struct Volume {
    disk: Arc<RamDisk>,
    fs: FlatFileSystem,
}

/// Executes commands and writes one response line per command
pub struct Shell<W: Write> {
    output: W,
    config: FsConfig,
    volume: Option<Volume>,
}

impl<W: Write> Shell<W> {
    pub fn new(output: W, config: FsConfig) -> Self {
        Self {
            output,
            config,
            volume: None,
        }
    }

    /// Run every line of `input` until `ex`, end of input or a fatal error
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<(), ShellError> {
        for line in input.lines() {
            if self.execute(&line?)? == Flow::Exit {
                break;
            }
        }
        self.output.flush()?;
        Ok(())
    }

    /// Execute one line. Recoverable failures are reported on the output
    pub fn execute(&mut self, line: &str) -> Result<Flow, ShellError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&name) = tokens.first() else {
            return Ok(Flow::Continue);
        };
        if self.volume.is_none() && name != "in" && name != "ex" {
            writeln!(self.output, "{}", ParseError::NotInitialized)?;
            return Ok(Flow::Continue);
        }
        let command = match Command::parse(&tokens) {
            Ok(command) => command,
            Err(err) => {
                writeln!(self.output, "{err}")?;
                return Ok(Flow::Continue);
            }
        };

        log::debug!("executing {command:?}");
        match self.dispatch(command) {
            Err(ShellError::Fs(err)) if !err.is_fatal() => {
                writeln!(self.output, "error: {err}")?;
                Ok(Flow::Continue)
            }
            result => result,
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<Flow, ShellError> {
        if let Command::Init {
            cylinders,
            surfaces,
            sectors,
            sector_size,
            image,
        } = command
        {
            let block_count = cylinders
                .checked_mul(surfaces)
                .and_then(|count| count.checked_mul(sectors))
                .ok_or(FsError::InvalidConfig("disk geometry is too large"))?;
            self.init(block_count, sector_size, &image)?;
            return Ok(Flow::Continue);
        }
        if command == Command::Exit {
            return Ok(Flow::Exit);
        }

        let Some(Volume { disk, fs }) = self.volume.as_mut() else {
            writeln!(self.output, "{}", ParseError::NotInitialized)?;
            return Ok(Flow::Continue);
        };
        let out = &mut self.output;
        match command {
            Command::Create(name) => {
                fs.create(&name)?;
                writeln!(out, "file {name} created")?;
            }
            Command::Destroy(name) => {
                fs.destroy(&name)?;
                writeln!(out, "file {name} destroyed")?;
            }
            Command::Open(name) => {
                let handle = fs.open(&name)?;
                writeln!(out, "file {name} opened, index={handle}")?;
            }
            Command::Close(handle) => {
                let name = fs.close(handle)?;
                writeln!(out, "file {name} closed")?;
            }
            Command::Read { handle, count } => {
                let mut buf = vec![0u8; count.min(fs.layout().max_file_size())];
                match fs.read(handle, &mut buf) {
                    Ok(len) => writeln!(
                        out,
                        "{len} bytes read: {}",
                        String::from_utf8_lossy(&buf[..len])
                    )?,
                    Err(FsError::EndOfFile) => writeln!(out, "end of file")?,
                    Err(err) => return Err(err.into()),
                }
            }
            Command::Write {
                handle,
                fill,
                count,
            } => {
                // anything past the size limit fails the same way
                let count = count.min(fs.layout().max_file_size() + 1);
                let len = fs.write(handle, &vec![fill; count])?;
                writeln!(out, "{len} bytes written")?;
            }
            Command::Seek { handle, position } => {
                let Ok(offset) = usize::try_from(position) else {
                    let size = fs.file_size(handle)?;
                    return Err(FsError::SeekOutOfRange { position, size }.into());
                };
                fs.seek(handle, offset)?;
                writeln!(out, "current position is {position}")?;
            }
            Command::Dir => {
                let listing: Vec<String> = fs
                    .list_files()?
                    .into_iter()
                    .map(|file| format!("{} {}", file.name, file.size))
                    .collect();
                writeln!(out, "{}", listing.join(", "))?;
            }
            Command::Save(path) => {
                fs.sync()?;
                save_image(&**disk, BufWriter::new(File::create(&path)?))?;
                writeln!(out, "disk saved")?;
            }
            Command::Init { .. } | Command::Exit => {}
        }
        Ok(Flow::Continue)
    }

    fn init(&mut self, block_count: usize, block_size: usize, image: &str) -> Result<(), ShellError> {
        // a failed init leaves no volume behind
        self.volume = None;
        Layout::new(block_size, block_count, self.config.max_files)?;
        match block_count.checked_mul(block_size) {
            Some(bytes) if bytes <= MAX_DISK_BYTES => {}
            _ => return Err(FsError::InvalidConfig("disk is larger than 1 GiB").into()),
        }
        let disk = Arc::new(RamDisk::new(block_count, block_size));
        let restored = Path::new(image).is_file();
        if restored {
            load_image(&*disk, BufReader::new(File::open(image)?))?;
        }
        let fs = FlatFileSystem::mount(disk.clone(), self.config)?;
        self.volume = Some(Volume { disk, fs });

        let message = if restored {
            "disk restored"
        } else {
            "disk initialized"
        };
        writeln!(self.output, "{message}")?;
        Ok(())
    }

    #[cfg(test)]
    fn output(&self) -> &W {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn session(script: &str) -> String {
        let mut shell = Shell::new(Vec::new(), FsConfig::default());
        shell.run(Cursor::new(script)).unwrap();
        String::from_utf8(shell.output().clone()).unwrap()
    }

    fn temp_image(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ffs-shell-{}-{tag}.img", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn parse_commands() {
        assert_eq!(
            Command::parse(&["wr", "1", "x", "60"]),
            Ok(Command::Write {
                handle: 1,
                fill: b'x',
                count: 60
            })
        );
        assert_eq!(
            Command::parse(&["sk", "1", "-1"]),
            Ok(Command::Seek {
                handle: 1,
                position: -1
            })
        );
        assert_eq!(Command::parse(&["dr"]), Ok(Command::Dir));
        assert_eq!(
            Command::parse(&["cr", "a", "b"]),
            Err(ParseError::WrongArgumentCount)
        );
        assert_eq!(Command::parse(&["mk", "a"]), Err(ParseError::WrongCommand));
        assert_eq!(
            Command::parse(&["sk", "1", "x"]),
            Err(ParseError::InvalidNumber("x".into()))
        );
        assert_eq!(
            Command::parse(&["wr", "1", "xy", "3"]),
            Err(ParseError::NotOneChar)
        );
        assert_eq!(
            Command::parse(&["wr", "1", "é", "3"]),
            Err(ParseError::NotOneChar)
        );
    }

    #[test]
    fn basic_session() {
        let image = temp_image("basic");
        let script = format!(
            "cr foo\n\
             in 4 4 4 64 {}\n\
             cr foo\n\
             op foo\n\
             wr 1 x 60\n\
             sk 1 0\n\
             rd 1 3\n\
             rd 1 100\n\
             rd 1 5\n\
             dr\n\
             cl 1\n\
             de foo\n\
             dr\n\
             ex\n\
             cr never\n",
            image.display()
        );
        let long_read = format!("57 bytes read: {}", "x".repeat(57));
        let expected = [
            "file system isn't initialized",
            "disk initialized",
            "file foo created",
            "file foo opened, index=1",
            "60 bytes written",
            "current position is 0",
            "3 bytes read: xxx",
            long_read.as_str(),
            "end of file",
            "foo 60",
            "file foo closed",
            "file foo destroyed",
            "",
        ];
        assert_eq!(session(&script).lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn domain_errors_are_reported_and_session_continues() {
        let image = temp_image("errors");
        let script = format!(
            "in 4 4 4 64 {}\n\
             op nope\n\
             cr foo\n\
             cr foo\n\
             op foo\n\
             op foo\n\
             de foo\n\
             sk 1 5\n\
             cl 7\n\
             wr 1 ab 3\n\
             rd 1\n\
             rd one 1\n\
             zz\n\
             cr a-very-long-name\n\
             dr\n",
            image.display()
        );
        let output = session(&script);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[1], format!("error: {}", FsError::NotFound("nope".into())));
        assert_eq!(lines[3], format!("error: {}", FsError::AlreadyExists("foo".into())));
        assert_eq!(lines[5], format!("error: {}", FsError::AlreadyOpen));
        assert_eq!(lines[6], format!("error: {}", FsError::FileIsOpen("foo".into())));
        assert_eq!(
            lines[7],
            format!(
                "error: {}",
                FsError::SeekOutOfRange {
                    position: 5,
                    size: 0
                }
            )
        );
        assert_eq!(lines[8], format!("error: {}", FsError::BadHandle(7)));
        assert_eq!(lines[9], "insert one char at a time, please");
        assert_eq!(lines[10], "wrong argument count");
        assert_eq!(lines[11], "Invalid number: one");
        assert_eq!(lines[12], "wrong command");
        assert!(lines[13].starts_with("error: "));
        assert_eq!(lines[14], "foo 0");
    }

    #[test]
    fn oversized_write_reports_error_and_keeps_prefix() {
        let image = temp_image("oversized");
        let script = format!(
            "in 4 4 4 64 {}\n\
             cr big\n\
             op big\n\
             wr 1 z 1000\n\
             dr\n",
            image.display()
        );
        let output = session(&script);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(
            lines[3],
            format!("error: {}", FsError::FileTooLarge { max: 192 })
        );
        assert_eq!(lines[4], "big 192");
    }

    #[test]
    fn saved_disk_is_restored() {
        let image = temp_image("restore");
        let first = format!(
            "in 4 4 4 64 {0}\n\
             cr foo\n\
             op foo\n\
             wr 1 q 70\n\
             sv {0}\n",
            image.display()
        );
        let output = session(&first);
        assert_eq!(output.lines().last(), Some("disk saved"));
        assert_eq!(std::fs::metadata(&image).unwrap().len(), 64 * 64);

        let second = format!(
            "in 4 4 4 64 {}\n\
             dr\n\
             op foo\n\
             rd 1 100\n",
            image.display()
        );
        let output = session(&second);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "disk restored");
        assert_eq!(lines[1], "foo 70");
        assert_eq!(lines[3], format!("70 bytes read: {}", "q".repeat(70)));
        std::fs::remove_file(&image).unwrap();
    }

    #[test]
    fn short_image_ends_the_session() {
        let image = temp_image("short");
        std::fs::write(&image, [0u8; 100]).unwrap();
        let mut shell = Shell::new(Vec::new(), FsConfig::default());
        let script = format!("in 4 4 4 64 {}\ndr\n", image.display());
        assert!(matches!(
            shell.run(Cursor::new(script)),
            Err(ShellError::Io(_))
        ));
        std::fs::remove_file(&image).unwrap();
    }

    #[test]
    fn bad_geometry_is_reported() {
        let image = temp_image("geometry");
        let output = session(&format!("in 1 1 4 60 {}\ndr\n", image.display()));
        let lines: Vec<_> = output.lines().collect();
        assert!(lines[0].starts_with("error: "));
        assert_eq!(lines[1], "file system isn't initialized");
    }

    #[test]
    fn oversized_geometry_is_reported() {
        let image = temp_image("oversized-geometry");
        let script = format!(
            "in 1 1 64 18446744073709551615 {0}\n\
             in 1 1 64 18446744073709551600 {0}\n\
             in 1000 1000 1000 4096 {0}\n\
             in 4 4 4 64 {0}\n",
            image.display()
        );
        let output = session(&script);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[..3].iter().all(|line| line.starts_with("error: ")));
        assert_eq!(lines[3], "disk initialized");
    }

    #[test]
    fn write_fills_exactly_count_bytes() {
        let image = temp_image("fill");
        let script = format!(
            "in 4 4 4 64 {}\n\
             cr f\n\
             op f\n\
             wr 1 é 3\n\
             wr 1 e 3\n\
             dr\n",
            image.display()
        );
        let output = session(&script);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[3], "insert one char at a time, please");
        assert_eq!(lines[4], "3 bytes written");
        assert_eq!(lines[5], "f 3");
    }

    #[test]
    fn negative_seek_is_out_of_range() {
        let image = temp_image("negative-seek");
        let script = format!(
            "in 4 4 4 64 {}\n\
             cr f\n\
             op f\n\
             wr 1 a 4\n\
             sk 1 -1\n\
             sk 1 2\n",
            image.display()
        );
        let output = session(&script);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(
            lines[4],
            format!(
                "error: {}",
                FsError::SeekOutOfRange {
                    position: -1,
                    size: 4
                }
            )
        );
        assert_eq!(lines[5], "current position is 2");
    }
}
