//! Device configuration and Init-time validation.
//!
//! Sizes and alignments are in octets. A configuration is checked once, when
//! the interface is initialized; nothing downstream re-validates it.

use crate::buf::{BufClass, BufPurpose, ClassConfig, PoolConfig};
use crate::error::ConfigError;

/// Maximum Ethernet frame without CRC.
pub const ETHER_FRAME_MAX: usize = 1514;
/// Minimum Ethernet frame without CRC.
pub const ETHER_FRAME_MIN: usize = 60;
/// Ethernet header (destination, source, type).
pub const ETHER_HDR_LEN: usize = 14;
/// Default Ethernet MTU.
pub const ETHER_MTU: usize = ETHER_FRAME_MAX - ETHER_HDR_LEN;

/// Swap data octets on the device bus.
pub const FLAG_SWAP_OCTETS: u32 = 1 << 0;

/// Per-device configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub rx_buf_large_size: usize,
    pub rx_buf_large_count: usize,
    pub rx_buf_align: usize,
    /// Octets the device writes ahead of a received frame.
    pub rx_buf_ix_offset: usize,

    pub tx_buf_large_size: usize,
    pub tx_buf_large_count: usize,
    pub tx_buf_small_size: usize,
    pub tx_buf_small_count: usize,
    pub tx_buf_align: usize,
    /// Octets the device needs ahead of a transmitted frame.
    pub tx_buf_ix_offset: usize,

    pub rx_desc_count: usize,
    pub tx_desc_count: usize,
    /// Capacity of the ready-frame ring, one slot of which is never used.
    pub rx_queue_size: usize,

    pub hw_addr: Option<[u8; 6]>,
    /// Option bits, `FLAG_*`.
    pub flags: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            rx_buf_large_size: 1518,
            rx_buf_large_count: 10,
            rx_buf_align: 4,
            rx_buf_ix_offset: 0,
            tx_buf_large_size: 1518,
            tx_buf_large_count: 5,
            tx_buf_small_size: 60,
            tx_buf_small_count: 5,
            tx_buf_align: 4,
            tx_buf_ix_offset: 0,
            rx_desc_count: 4,
            tx_desc_count: 4,
            rx_queue_size: 8,
            hw_addr: None,
            flags: 0,
        }
    }
}

impl DeviceConfig {
    /// Check every bring-up constraint, failing on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_align("receive", self.rx_buf_align)?;
        check_align("transmit", self.tx_buf_align)?;

        if self.rx_buf_large_count == 0 {
            return Err(ConfigError::NoRxBuffers);
        }
        check_offset("receive", self.rx_buf_ix_offset, self.rx_buf_large_size)?;
        // The offset is carved out of the area, the frame must still fit.
        let rx_data = self.rx_buf_large_size - self.rx_buf_ix_offset;
        if rx_data < ETHER_FRAME_MAX {
            return Err(ConfigError::BufferTooSmall {
                class: "large receive",
                size: rx_data,
                min: ETHER_FRAME_MAX,
            });
        }

        if self.tx_buf_large_count == 0 && self.tx_buf_small_count == 0 {
            return Err(ConfigError::NoTxBuffers);
        }
        if self.tx_buf_large_count > 0 {
            if self.tx_buf_large_size < ETHER_FRAME_MIN {
                return Err(ConfigError::BufferTooSmall {
                    class: "large transmit",
                    size: self.tx_buf_large_size,
                    min: ETHER_FRAME_MIN,
                });
            }
            check_offset("transmit", self.tx_buf_ix_offset, self.tx_buf_large_size)?;
        }
        if self.tx_buf_small_count > 0 {
            if self.tx_buf_small_size < ETHER_FRAME_MIN {
                return Err(ConfigError::BufferTooSmall {
                    class: "small transmit",
                    size: self.tx_buf_small_size,
                    min: ETHER_FRAME_MIN,
                });
            }
            check_offset("transmit", self.tx_buf_ix_offset, self.tx_buf_small_size)?;
        }
        if self.tx_buf_large_count > 0
            && self.tx_buf_small_count > 0
            && self.tx_buf_large_size < self.tx_buf_small_size
        {
            return Err(ConfigError::TxLargeSmallerThanSmall {
                large: self.tx_buf_large_size,
                small: self.tx_buf_small_size,
            });
        }

        check_desc_count("receive", self.rx_desc_count)?;
        check_desc_count("transmit", self.tx_desc_count)?;
        if self.rx_buf_large_count <= self.rx_desc_count {
            return Err(ConfigError::RxDescriptorsExceedBuffers {
                bufs: self.rx_buf_large_count,
                descs: self.rx_desc_count,
            });
        }
        if self.rx_queue_size < 2 {
            return Err(ConfigError::RxQueueTooSmall(self.rx_queue_size));
        }

        Ok(())
    }

    /// Buffer pool layout derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            rx_large: ClassConfig {
                class: BufClass::Large,
                purpose: BufPurpose::Rx,
                size: self.rx_buf_large_size - self.rx_buf_ix_offset,
                count: self.rx_buf_large_count,
                align: self.rx_buf_align,
                ix_offset: self.rx_buf_ix_offset,
            },
            tx_large: ClassConfig {
                class: BufClass::Large,
                purpose: BufPurpose::Tx,
                size: self.tx_buf_large_size.saturating_sub(self.tx_buf_ix_offset),
                count: self.tx_buf_large_count,
                align: self.tx_buf_align,
                ix_offset: self.tx_buf_ix_offset,
            },
            tx_small: ClassConfig {
                class: BufClass::Small,
                purpose: BufPurpose::Tx,
                size: self.tx_buf_small_size.saturating_sub(self.tx_buf_ix_offset),
                count: self.tx_buf_small_count,
                align: self.tx_buf_align,
                ix_offset: self.tx_buf_ix_offset,
            },
        }
    }

    /// Largest MTU the transmit buffers can carry.
    pub fn mtu_max(&self) -> usize {
        let large = if self.tx_buf_large_count > 0 {
            self.tx_buf_large_size.saturating_sub(self.tx_buf_ix_offset)
        } else {
            0
        };
        let small = if self.tx_buf_small_count > 0 {
            self.tx_buf_small_size.saturating_sub(self.tx_buf_ix_offset)
        } else {
            0
        };
        large.max(small).saturating_sub(ETHER_HDR_LEN).min(ETHER_MTU)
    }

    /// Whether the driver must swap each octet pair between memory and the
    /// device bus.
    pub fn swap_octets(&self) -> bool {
        self.flags & FLAG_SWAP_OCTETS != 0
    }
}

fn check_align(purpose: &'static str, align: usize) -> Result<(), ConfigError> {
    if align == 0 || !align.is_power_of_two() {
        return Err(ConfigError::InvalidAlignment { purpose, align });
    }
    Ok(())
}

fn check_offset(purpose: &'static str, offset: usize, size: usize) -> Result<(), ConfigError> {
    if offset >= size {
        return Err(ConfigError::InvalidOffset {
            purpose,
            offset,
            size,
        });
    }
    Ok(())
}

fn check_desc_count(purpose: &'static str, count: usize) -> Result<(), ConfigError> {
    // One ring slot is reserved to tell empty from full.
    if count == 0 || count >= u16::MAX as usize {
        return Err(ConfigError::InvalidDescriptorCount { purpose, count });
    }
    Ok(())
}

/// Parse a hardware address of the form `"00:AB:CD:EF:80:01"`.
///
/// Returns `None` for anything other than six colon-separated hex octets.
pub fn parse_hw_addr(text: &str) -> Option<[u8; 6]> {
    let mut addr = [0u8; 6];
    let mut parts = text.split(':');
    for octet in addr.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 2 {
            return None;
        }
        *octet = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(DeviceConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_alignment_must_be_power_of_two() {
        let cfg = DeviceConfig {
            rx_buf_align: 6,
            ..DeviceConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidAlignment {
                purpose: "receive",
                align: 6
            })
        );

        let cfg = DeviceConfig {
            tx_buf_align: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidAlignment { purpose: "transmit", .. })
        ));
    }

    #[test]
    fn test_rx_buffer_must_hold_max_frame() {
        let cfg = DeviceConfig {
            rx_buf_large_size: 1024,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BufferTooSmall { size: 1024, .. })
        ));
    }

    #[test]
    fn test_tx_classes() {
        let none = DeviceConfig {
            tx_buf_large_count: 0,
            tx_buf_small_count: 0,
            ..DeviceConfig::default()
        };
        assert_eq!(none.validate(), Err(ConfigError::NoTxBuffers));

        let inverted = DeviceConfig {
            tx_buf_large_size: 100,
            tx_buf_small_size: 200,
            ..DeviceConfig::default()
        };
        assert_eq!(
            inverted.validate(),
            Err(ConfigError::TxLargeSmallerThanSmall {
                large: 100,
                small: 200
            })
        );

        // Zero small buffers: the small size is never looked at.
        let large_only = DeviceConfig {
            tx_buf_small_count: 0,
            tx_buf_small_size: 0,
            ..DeviceConfig::default()
        };
        assert_eq!(large_only.validate(), Ok(()));
    }

    #[test]
    fn test_offset_must_fit() {
        let cfg = DeviceConfig {
            tx_buf_ix_offset: 60,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidOffset { purpose: "transmit", .. })
        ));
    }

    #[test]
    fn test_rx_buffers_outnumber_descriptors() {
        let cfg = DeviceConfig {
            rx_buf_large_count: 4,
            rx_desc_count: 4,
            ..DeviceConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::RxDescriptorsExceedBuffers { bufs: 4, descs: 4 })
        );
    }

    #[test]
    fn test_descriptor_counts() {
        let cfg = DeviceConfig {
            tx_desc_count: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidDescriptorCount { purpose: "transmit", count: 0 })
        ));

        let cfg = DeviceConfig {
            rx_queue_size: 1,
            ..DeviceConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::RxQueueTooSmall(1)));
    }

    #[test]
    fn test_mtu_max() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.mtu_max(), ETHER_MTU);

        let cfg = DeviceConfig {
            tx_buf_large_size: 1000,
            tx_buf_ix_offset: 4,
            ..DeviceConfig::default()
        };
        assert_eq!(cfg.mtu_max(), 1000 - 4 - ETHER_HDR_LEN);
    }

    #[test]
    fn test_parse_hw_addr() {
        assert_eq!(
            parse_hw_addr("00:AB:CD:EF:80:01"),
            Some([0x00, 0xAB, 0xCD, 0xEF, 0x80, 0x01])
        );
        assert_eq!(parse_hw_addr("0:1:2:3:4:5"), Some([0, 1, 2, 3, 4, 5]));
        assert_eq!(parse_hw_addr("00:AB:CD:EF:80"), None);
        assert_eq!(parse_hw_addr("00:AB:CD:EF:80:01:02"), None);
        assert_eq!(parse_hw_addr("00:AB:CD:EF:80:G1"), None);
        assert_eq!(parse_hw_addr("00:AB::EF:80:01"), None);
    }
}
