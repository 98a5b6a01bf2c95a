//! This module defines the `Command` enum and its associated methods for parsing
//! and handling user commands in the volume browser.
//!
//! The `Command` enum represents the commands a user can type at the prompt,
//! such as opening an image, listing a directory, printing a file or scanning
//! an NTFS Master File Table.

/// Represents a user command in the volume browser.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Command to quit the program.
    Quit,
    /// Open a disk image or device, with the partition start in sectors.
    Open(String, u64),
    /// Print the layout of the open volume.
    Info,
    /// List a directory, the root when no path is given.
    Ls(String),
    /// Print the tree below a directory, the root when no path is given.
    Tree(String),
    /// Print a file's content as text.
    Cat(String),
    /// Print an entry's metadata.
    Stat(String),
    /// Print a file's content as a hex dump.
    Dump(String),
    /// Scan the MFT of an NTFS volume and resolve its tree.
    Scan,
    /// Print one raw MFT record.
    Record(u64),
    /// Search NTFS entries by name.
    Find(String),
    /// Toggle case-insensitive path lookup.
    Case,
    /// Toggle the BPB validation for volumes opened afterwards.
    Skip,
    /// Set the number of worker threads used by MFT scans, 0 for automatic.
    Threads(usize),
    /// Command for an unknown input, encapsulating the raw input as a `String`.
    Unknown(String),
    /// Command for invalid input, encapsulating an error message as a `String`.
    Invalid(String),
    /// Command for an empty input.
    Empty,
}

impl Command {
    /// Parses a string into a `Command` instance.
    ///
    /// Path arguments take the rest of the line, so they may contain spaces.
    ///
    /// # Parameters
    /// - `s`: A string slice representing the user input.
    ///
    /// # Returns
    /// - The matching command when the keyword is known and its arguments parse.
    /// - `Command::Invalid` if a required argument is missing or malformed.
    /// - `Command::Unknown` if the input does not match any known command.
    /// - `Command::Empty` if the input is empty or contains only whitespace.
    pub fn from_string(s: &str) -> Self {
        let s = s.trim();
        let (keyword, rest) = match s.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (s, ""),
        };

        match keyword {
            "" => Command::Empty,
            "quit" | "exit" => Command::Quit,
            "open" => Self::parse_open(rest),
            "info" => Command::Info,
            "ls" => Command::Ls(rest.to_string()),
            "tree" => Command::Tree(rest.to_string()),
            "cat" => Self::required(rest, "cat", Command::Cat),
            "stat" => Self::required(rest, "stat", Command::Stat),
            "dump" => Self::required(rest, "dump", Command::Dump),
            "find" => Self::required(rest, "find", Command::Find),
            "scan" => Command::Scan,
            "record" => match rest.parse::<u64>() {
                Ok(nb) => Command::Record(nb),
                Err(_) => Command::Invalid(String::from(
                    "Arg parsing error: 'record' expects an MFT record number.",
                )),
            },
            "case" => Command::Case,
            "skip" => Command::Skip,
            "threads" => match rest.parse::<usize>() {
                Ok(nb) => Command::Threads(nb),
                Err(_) => Command::Invalid(String::from(
                    "Arg parsing error: 'threads' expects an unsigned integer.",
                )),
            },
            other => Command::Unknown(other.to_string()),
        }
    }

    /// `open <path> [offset]`: a trailing integer is the partition start.
    fn parse_open(rest: &str) -> Self {
        if rest.is_empty() {
            return Command::Invalid(String::from(
                "Missing arg: 'open' expects the path to a disk image or device.",
            ));
        }
        if let Some((path, offset)) = rest.rsplit_once(char::is_whitespace) {
            if let Ok(offset) = offset.parse::<u64>() {
                return Command::Open(path.trim().to_string(), offset);
            }
        }
        Command::Open(rest.to_string(), 0)
    }

    fn required(rest: &str, name: &str, build: fn(String) -> Command) -> Self {
        if rest.is_empty() {
            Command::Invalid(format!("Missing arg: '{name}' expects a path."))
        } else {
            build(rest.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_takes_an_optional_offset() {
        assert_eq!(
            Command::from_string("open disk.img"),
            Command::Open(String::from("disk.img"), 0)
        );
        assert_eq!(
            Command::from_string("open /images/usb stick.dd 2048\n"),
            Command::Open(String::from("/images/usb stick.dd"), 2048)
        );
        assert!(matches!(Command::from_string("open"), Command::Invalid(_)));
    }

    #[test]
    fn paths_keep_their_spaces() {
        assert_eq!(
            Command::from_string("cat Case Files/2024/evidence log.txt"),
            Command::Cat(String::from("Case Files/2024/evidence log.txt"))
        );
        assert_eq!(Command::from_string("ls"), Command::Ls(String::new()));
        assert!(matches!(Command::from_string("stat   "), Command::Invalid(_)));
    }

    #[test]
    fn numeric_arguments() {
        assert_eq!(Command::from_string("record 5"), Command::Record(5));
        assert_eq!(Command::from_string("threads 4"), Command::Threads(4));
        assert!(matches!(Command::from_string("record five"), Command::Invalid(_)));
    }

    #[test]
    fn empty_and_unknown_input() {
        assert_eq!(Command::from_string("   \n"), Command::Empty);
        assert_eq!(
            Command::from_string("format c:"),
            Command::Unknown(String::from("format"))
        );
    }
}
