//! Every piece of text the server sends to a player.

use crate::error::{AuthError, CommandError, WorldError};
use crate::world::{Character, Clan};
use shared::Location;
use std::net::IpAddr;

pub const AUTH_PROMPT: &str = "Enter a command: /register or /login.";
pub const UNRECOGNIZED_AUTH_COMMAND: &str = "Unrecognized command, enter /register or /login.";
pub const USERNAME_PROMPT: &str = "Enter username:";
pub const PASSWORD_PROMPT: &str = "Enter password:";
pub const EMPTY_USERNAME: &str = "Username must not be empty.";
pub const EMPTY_PASSWORD: &str = "Password must not be empty.";
pub const REGISTERED: &str = "Registration successful!";
pub const LOGGED_IN: &str = "Login successful!";
pub const WELCOME: &str = "Welcome! Type /help for the list of commands.";
pub const GOODBYE: &str = "Goodbye!";
pub const IDLE_TIMEOUT: &str = "Disconnected after being idle for too long.";
pub const SHUTTING_DOWN: &str = "Server is shutting down.";
pub const LINE_TOO_LONG: &str = "Line too long, it was discarded.";
pub const GENERIC_FAILURE: &str = "Something went wrong, please try again.";

pub const HELP: &str = "Available commands:\n\
/move <north|south|east|west> - move your character\n\
/info <name> - a character's location\n\
/my - your own character\n\
/date - current server time\n\
/ip - your IP address\n\
/online - number of players online\n\
/clan <name> - found a clan\n\
/world <message> - send a message to the world chat\n\
/quit - disconnect\n\
/help - this list";

pub fn auth_error(error: AuthError) -> &'static str {
    match error {
        AuthError::UnknownUser => "Username not found.",
        AuthError::InvalidCredential => "Wrong password.",
        AuthError::AccountExists => "Username is taken, try again.",
        AuthError::AlreadyOnline => "This user is already online.",
    }
}

pub fn world_error(error: &WorldError) -> String {
    match error {
        WorldError::Auth(auth) => auth_error(*auth).to_string(),
        WorldError::NotFound(_) => "No character with that name.".to_string(),
        WorldError::ClanExists(name) => format!("Clan '{}' already exists.", name),
        WorldError::AlreadyInClan(_) => "You already belong to a clan.".to_string(),
        WorldError::Persistence(_) => GENERIC_FAILURE.to_string(),
    }
}

pub fn command_error(error: &CommandError) -> String {
    match error {
        CommandError::UnknownCommand(name) => {
            format!("Unknown command '/{}'. Type /help for the list of commands.", name)
        }
        CommandError::MissingArgument("move") => {
            "Specify a direction: north, south, east or west.".to_string()
        }
        CommandError::MissingArgument("info") => "Specify a character name.".to_string(),
        CommandError::MissingArgument("clan") => "Specify a clan name.".to_string(),
        CommandError::MissingArgument("world") => "Specify a message.".to_string(),
        CommandError::MissingArgument(command) => format!("Missing argument for /{}.", command),
        CommandError::InvalidDirection(direction) => format!(
            "Unknown direction '{}', use north, south, east or west.",
            direction
        ),
    }
}

pub fn location(location: Location) -> String {
    format!("Your location: {}", location)
}

pub fn character_info(character: &Character) -> String {
    format!(
        "Name: {}\nLocation: {}",
        character.user_name, character.location
    )
}

pub fn own_character(character: &Character) -> String {
    format!(
        "Name: {}\nLocation: {}\nClan: {}",
        character.user_name,
        character.location,
        character.clan.as_deref().unwrap_or("none")
    )
}

pub fn date(now: &str) -> String {
    format!("Current date: {}", now)
}

pub fn ip(addr: IpAddr) -> String {
    format!("Your IP address: {}", addr)
}

pub fn online(count: usize) -> String {
    format!("Players online: {}", count)
}

pub fn clan_founded(clan: &Clan) -> String {
    format!("Clan '{}' founded.", clan.name)
}

pub fn world_chat(username: &str, message: &str) -> String {
    format!("[world] {}: {}", username, message)
}
