use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 12344;
pub const MAP_WIDTH: i32 = 50;
pub const MAP_HEIGHT: i32 = 50;

/// Leading character that marks a line as a command rather than chat
pub const COMMAND_SENTINEL: char = '/';

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl Location {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::South => (0, -1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDirection(pub String);

impl fmt::Display for UnknownDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown direction '{}'", self.0)
    }
}

impl std::error::Error for UnknownDirection {}

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" => Ok(Direction::North),
            "south" => Ok(Direction::South),
            "east" => Ok(Direction::East),
            "west" => Ok(Direction::West),
            _ => Err(UnknownDirection(s.trim().to_string())),
        }
    }
}

/// Symmetric map bounds: every coordinate satisfies `-(N-1) <= c <= N-1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapBounds {
    pub width: i32,
    pub height: i32,
}

impl Default for MapBounds {
    fn default() -> Self {
        Self {
            width: MAP_WIDTH,
            height: MAP_HEIGHT,
        }
    }
}

impl MapBounds {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Largest valid absolute coordinate on each axis
    fn limits(&self) -> (i32, i32) {
        (
            self.width.saturating_sub(1).max(0),
            self.height.saturating_sub(1).max(0),
        )
    }

    pub fn contains(&self, location: Location) -> bool {
        let (max_x, max_y) = self.limits();
        (-max_x..=max_x).contains(&location.x) && (-max_y..=max_y).contains(&location.y)
    }

    pub fn clamp(&self, location: Location) -> Location {
        let (max_x, max_y) = self.limits();
        Location {
            x: location.x.clamp(-max_x, max_x),
            y: location.y.clamp(-max_y, max_y),
        }
    }

    /// Returns the location one step in `direction`, or `location` unchanged
    /// when the step would leave the map.
    pub fn step(&self, location: Location, direction: Direction) -> Location {
        let (dx, dy) = direction.offset();
        let next = Location {
            x: location.x.saturating_add(dx),
            y: location.y.saturating_add(dy),
        };

        if self.contains(next) {
            next
        } else {
            location
        }
    }
}

/// A single client line split into its protocol meaning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// `/name args`, name lowercased, args with surrounding whitespace trimmed
    Command { name: String, args: &'a str },
    /// Anything not starting with the sentinel
    Text(&'a str),
    Empty,
}

pub fn parse_line(raw: &str) -> Line<'_> {
    let line = raw.trim();
    if line.is_empty() {
        return Line::Empty;
    }

    match line.strip_prefix(COMMAND_SENTINEL) {
        Some(rest) => {
            let rest = rest.trim_start();
            let (name, args) = match rest.split_once(' ') {
                Some((name, args)) => (name, args.trim()),
                None => (rest, ""),
            };
            Line::Command {
                name: name.to_ascii_lowercase(),
                args,
            }
        }
        None => Line::Text(line),
    }
}
