use serde::{Deserialize, Serialize};

/// Legacy JSON Wire Protocol status codes, carried in the `status` field of
/// every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Status {
    Success,
    NoSuchDriver,
    NoSuchElement,
    NoSuchFrame,
    UnknownCommand,
    StaleElementReference,
    ElementNotVisible,
    InvalidElementState,
    UnknownError,
    ElementIsNotSelectable,
    JavaScriptError,
    XPathLookupError,
    Timeout,
    NoSuchWindow,
    InvalidCookieDomain,
    UnableToSetCookie,
    UnexpectedAlertOpen,
    NoAlertOpen,
    ScriptTimeout,
    InvalidElementCoordinates,
    ImeNotAvailable,
    ImeEngineActivationFailed,
    InvalidSelector,
    SessionNotCreated,
    MoveTargetOutOfBounds,
    InvalidArgument,
}

impl Status {
    pub fn code(self) -> u32 {
        match self {
            Status::Success => 0,
            Status::NoSuchDriver => 6,
            Status::NoSuchElement => 7,
            Status::NoSuchFrame => 8,
            Status::UnknownCommand => 9,
            Status::StaleElementReference => 10,
            Status::ElementNotVisible => 11,
            Status::InvalidElementState => 12,
            Status::UnknownError => 13,
            Status::ElementIsNotSelectable => 15,
            Status::JavaScriptError => 17,
            Status::XPathLookupError => 19,
            Status::Timeout => 21,
            Status::NoSuchWindow => 23,
            Status::InvalidCookieDomain => 24,
            Status::UnableToSetCookie => 25,
            Status::UnexpectedAlertOpen => 26,
            Status::NoAlertOpen => 27,
            Status::ScriptTimeout => 28,
            Status::InvalidElementCoordinates => 29,
            Status::ImeNotAvailable => 30,
            Status::ImeEngineActivationFailed => 31,
            Status::InvalidSelector => 32,
            Status::SessionNotCreated => 33,
            Status::MoveTargetOutOfBounds => 34,
            Status::InvalidArgument => 61,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl From<Status> for u32 {
    fn from(status: Status) -> u32 {
        status.code()
    }
}

// Codes outside the table collapse to UnknownError.
impl From<u32> for Status {
    fn from(code: u32) -> Self {
        match code {
            0 => Status::Success,
            6 => Status::NoSuchDriver,
            7 => Status::NoSuchElement,
            8 => Status::NoSuchFrame,
            9 => Status::UnknownCommand,
            10 => Status::StaleElementReference,
            11 => Status::ElementNotVisible,
            12 => Status::InvalidElementState,
            15 => Status::ElementIsNotSelectable,
            17 => Status::JavaScriptError,
            19 => Status::XPathLookupError,
            21 => Status::Timeout,
            23 => Status::NoSuchWindow,
            24 => Status::InvalidCookieDomain,
            25 => Status::UnableToSetCookie,
            26 => Status::UnexpectedAlertOpen,
            27 => Status::NoAlertOpen,
            28 => Status::ScriptTimeout,
            29 => Status::InvalidElementCoordinates,
            30 => Status::ImeNotAvailable,
            31 => Status::ImeEngineActivationFailed,
            32 => Status::InvalidSelector,
            33 => Status::SessionNotCreated,
            34 => Status::MoveTargetOutOfBounds,
            61 => Status::InvalidArgument,
            _ => Status::UnknownError,
        }
    }
}
