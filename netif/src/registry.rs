// Interface registry
// Built once at system configuration time and then shared by reference with
// tasks and interrupt vector stubs. No interface lives in a global.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::info;

use crate::config::DeviceConfig;
use crate::drivers::{Bsp, Driver};
use crate::error::NetError;
use crate::iface::Interface;

/// Interface number, the index into a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IfNbr(pub u8);

#[derive(Debug, Default)]
pub struct Registry {
    ifaces: Vec<Interface>,
}

impl Registry {
    pub fn new() -> Self {
        Self { ifaces: Vec::new() }
    }

    /// Register and initialize an interface.
    ///
    /// An interface that fails `init` is not registered, and its number is
    /// handed to the next one added.
    pub fn add(
        &mut self,
        cfg: DeviceConfig,
        driver: Box<dyn Driver>,
        bsp: Box<dyn Bsp>,
    ) -> Result<IfNbr, NetError> {
        let nbr = u8::try_from(self.ifaces.len())
            .map(IfNbr)
            .map_err(|_| NetError::TableFull)?;
        let iface = Interface::new(nbr, cfg, driver, bsp);
        iface.init()?;
        self.ifaces.push(iface);
        info!("netif {}: registered", nbr.0);
        Ok(nbr)
    }

    pub fn get(&self, nbr: IfNbr) -> Result<&Interface, NetError> {
        self.ifaces
            .get(nbr.0 as usize)
            .ok_or(NetError::InvalidInterface(nbr.0))
    }

    pub fn start(&self, nbr: IfNbr) -> Result<(), NetError> {
        self.get(nbr)?.start()
    }

    pub fn stop(&self, nbr: IfNbr) -> Result<(), NetError> {
        self.get(nbr)?.stop()
    }

    /// Stop every running interface, returning the first error seen.
    pub fn stop_all(&self) -> Result<(), NetError> {
        let mut first = Ok(());
        for iface in self.ifaces.iter().filter(|i| i.is_running()) {
            if let Err(e) = iface.stop() {
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.ifaces.iter()
    }

    pub fn len(&self) -> usize {
        self.ifaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ifaces.is_empty()
    }
}
