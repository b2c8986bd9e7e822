use phf::{phf_map, Map};
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug)]
pub struct Board {
    pub manufacturer: &'static str,
    pub description: &'static str,
    pub image_file: &'static str,
    pub default_user: &'static str,
    pub default_hostname: &'static str,
}

// Every image listed here is Debian derived: MBR with FAT boot as partition 1, EXT4 root as partition 2, and the
// stock /etc/rc.local.
pub static BOARDS: Map<&'static str, Board> = phf_map! {
    "raspberrypi" => Board {
        manufacturer: "raspberrypi",
        description: "Raspberry Pi (any model), Raspberry Pi OS Lite",
        image_file: "raspios-lite-armhf.img",
        default_user: "pi",
        default_hostname: "raspberrypi",
    },
    "raspberrypi64" => Board {
        manufacturer: "raspberrypi",
        description: "Raspberry Pi 3/4/5, Raspberry Pi OS Lite (64-bit)",
        image_file: "raspios-lite-arm64.img",
        default_user: "pi",
        default_hostname: "raspberrypi",
    },
    "odroidc1" => Board {
        manufacturer: "hardkernel",
        description: "ODROID-C1+, Ubuntu minimal",
        image_file: "ubuntu-minimal-odroidc1.img",
        default_user: "odroid",
        default_hostname: "odroid",
    },
};

pub const DEFAULT_MANUFACTURER: &str = "raspberrypi";
pub const DEFAULT_BOARD: &str = "raspberrypi";

#[derive(Debug, Clone, Copy)]
pub struct Distro {
    pub board_name: &'static str,
    pub board: &'static Board,
}

impl Distro {
    pub fn lookup(manufacturer: &str, board: &str) -> Result<Self, String> {
        let (board_name, entry) = match BOARDS.get_entry(board) {
            Some((name, entry)) => (*name, entry),
            None => return Err(format!("unknown board {:?}; {}", board, board_help())),
        };

        if entry.manufacturer != manufacturer {
            return Err(format!("board {} is made by {}, not {}", board_name, entry.manufacturer, manufacturer));
        }

        Ok(Self { board_name, board: entry })
    }

    pub fn image_file(&self) -> &'static str {
        self.board.image_file
    }

    pub fn default_user(&self) -> &'static str {
        self.board.default_user
    }

    pub fn default_hostname(&self) -> &'static str {
        self.board.default_hostname
    }
}

impl Display for Distro {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{} ({})", self.board.manufacturer, self.board_name, self.board.description)
    }
}

pub fn manufacturer_help() -> String {
    let mut names: Vec<&str> = BOARDS.values().map(|b| b.manufacturer).collect();
    names.sort_unstable();
    names.dedup();
    format!("board manufacturer; one of {}", names.join(","))
}

pub fn board_help() -> String {
    let mut names: Vec<&str> = BOARDS.keys().copied().collect();
    names.sort_unstable();
    format!("board name; one of {}", names.join(","))
}
