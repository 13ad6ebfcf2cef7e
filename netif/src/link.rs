// Link state types and the PHY seam

use crate::error::MgmtError;
use crate::registry::IfNbr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkSpeed {
    #[default]
    Unknown,
    Mbps10,
    Mbps100,
    Mbps1000,
}

impl LinkSpeed {
    /// Speed in Mbit/s, zero when unknown.
    pub fn mbps(self) -> u32 {
        match self {
            LinkSpeed::Unknown => 0,
            LinkSpeed::Mbps10 => 10,
            LinkSpeed::Mbps100 => 100,
            LinkSpeed::Mbps1000 => 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Duplex {
    #[default]
    Unknown,
    Half,
    Full,
}

/// Negotiated link parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub speed: LinkSpeed,
    pub duplex: Duplex,
}

impl LinkState {
    pub const DOWN: LinkState = LinkState {
        speed: LinkSpeed::Unknown,
        duplex: Duplex::Unknown,
    };

    pub const fn new(speed: LinkSpeed, duplex: Duplex) -> Self {
        Self { speed, duplex }
    }

    pub fn status(&self) -> LinkStatus {
        if self.speed == LinkSpeed::Unknown {
            LinkStatus::Down
        } else {
            LinkStatus::Up
        }
    }

    pub fn is_up(&self) -> bool {
        self.status() == LinkStatus::Up
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Down,
    Up,
}

/// Called on every up/down transition, from task context.
pub type LinkSubscriber = fn(IfNbr, LinkStatus);

/// MDIO-style register access to PHYs behind a MAC.
pub trait MgmtBus {
    fn read(&mut self, phy_addr: u8, reg: u8) -> Result<u16, MgmtError>;
    fn write(&mut self, phy_addr: u8, reg: u8, value: u16) -> Result<(), MgmtError>;
}

/// A PHY-capable component.
///
/// Implementations read their own registers through whatever management bus
/// the MAC exposes; they never see the MAC's concrete type.
pub trait Phy {
    fn link_state(&mut self, bus: &mut dyn MgmtBus) -> Result<LinkState, MgmtError>;
}

/// Basic-mode registers of an IEEE 802.3 clause 22 PHY.
pub mod mii {
    pub const BMCR: u8 = 0x00;
    pub const BMSR: u8 = 0x01;

    pub const BMCR_SPEED_100: u16 = 1 << 13;
    pub const BMCR_FULL_DUPLEX: u16 = 1 << 8;
    pub const BMCR_SPEED_1000: u16 = 1 << 6;

    pub const BMSR_LINK_UP: u16 = 1 << 2;
    pub const BMSR_AN_COMPLETE: u16 = 1 << 5;
}

/// A clause 22 PHY that reports the forced or resolved mode out of BMCR.
#[derive(Debug, Clone, Copy)]
pub struct GenericPhy {
    pub addr: u8,
}

impl GenericPhy {
    pub const fn new(addr: u8) -> Self {
        Self { addr }
    }
}

impl Phy for GenericPhy {
    fn link_state(&mut self, bus: &mut dyn MgmtBus) -> Result<LinkState, MgmtError> {
        let bmsr = bus.read(self.addr, mii::BMSR)?;
        if bmsr & mii::BMSR_LINK_UP == 0 {
            return Ok(LinkState::DOWN);
        }
        let bmcr = bus.read(self.addr, mii::BMCR)?;
        let speed = match (bmcr & mii::BMCR_SPEED_1000 != 0, bmcr & mii::BMCR_SPEED_100 != 0) {
            (true, false) => LinkSpeed::Mbps1000,
            (false, true) => LinkSpeed::Mbps100,
            (false, false) => LinkSpeed::Mbps10,
            (true, true) => LinkSpeed::Unknown,
        };
        let duplex = if bmcr & mii::BMCR_FULL_DUPLEX != 0 {
            Duplex::Full
        } else {
            Duplex::Half
        };
        Ok(LinkState::new(speed, duplex))
    }
}
