//! UART configuration for the GPS engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default RX pin of the GPS receiver.
pub const DEFAULT_RX_PIN: u32 = 18;

/// Default depth of the driver notification queue (and pattern queue).
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid framing '{0}': expected <data bits><parity><stop bits>, e.g. '8N1'")]
    InvalidFraming(String),
    #[error("Invalid data bits '{0}': must be 5, 6, 7 or 8")]
    InvalidDataBits(char),
    #[error("Invalid parity '{0}': must be N, E, or O")]
    InvalidParity(char),
    #[error("Invalid stop bits '{0}': must be 1 or 2")]
    InvalidStopBits(char),
    #[error("Baud rate must be non-zero")]
    ZeroBaudRate,
    #[error("Notification queue depth must be non-zero")]
    ZeroQueueSize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Parity {
    Disable,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

/// UART parameters of the GPS receiver link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UartConfig {
    /// UART port number.
    pub port: u8,
    pub rx_pin: u32,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Depth of the driver notification queue and of the pattern queue.
    pub event_queue_size: usize,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self::new_8n1(1, DEFAULT_RX_PIN, 9600)
    }
}

impl UartConfig {
    /// Create a standard 8N1 configuration at specified baud rate
    pub fn new_8n1(port: u8, rx_pin: u32, baud_rate: u32) -> Self {
        Self {
            port,
            rx_pin,
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::Disable,
            stop_bits: StopBits::One,
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
        }
    }

    /// Apply a framing string like "8N1" (8 data bits, no parity, 1 stop bit).
    pub fn with_framing(mut self, framing: &str) -> Result<Self, ConfigError> {
        let chars: Vec<char> = framing.chars().collect();
        let [data, parity, stop] = chars.as_slice() else {
            return Err(ConfigError::InvalidFraming(framing.to_string()));
        };

        self.data_bits = match *data {
            '5' => DataBits::Five,
            '6' => DataBits::Six,
            '7' => DataBits::Seven,
            '8' => DataBits::Eight,
            c => return Err(ConfigError::InvalidDataBits(c)),
        };

        self.parity = match parity.to_ascii_uppercase() {
            'N' => Parity::Disable,
            'E' => Parity::Even,
            'O' => Parity::Odd,
            c => return Err(ConfigError::InvalidParity(c)),
        };

        self.stop_bits = match *stop {
            '1' => StopBits::One,
            '2' => StopBits::Two,
            c => return Err(ConfigError::InvalidStopBits(c)),
        };

        Ok(self)
    }

    pub fn with_event_queue_size(mut self, depth: usize) -> Self {
        self.event_queue_size = depth;
        self
    }

    /// Framing in "8N1" notation. 1.5 stop bits render as "1.5".
    pub fn framing(&self) -> String {
        let parity = match self.parity {
            Parity::Disable => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        format!("{}{}{}", self.data_bits.bits(), parity, stop)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        if self.event_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }
}
