//! Delivery bookkeeping shared by the notification transports

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which transports still owe a delivery (one bit per transport)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryFlags(u8);

impl DeliveryFlags {
    pub const NONE: DeliveryFlags = DeliveryFlags(0);
    pub const ALERT: DeliveryFlags = DeliveryFlags(0x1);
    pub const REMOTE: DeliveryFlags = DeliveryFlags(0x2);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: DeliveryFlags) -> bool {
        !other.is_empty() && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: DeliveryFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: DeliveryFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for DeliveryFlags {
    type Output = DeliveryFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        DeliveryFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for DeliveryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(DeliveryFlags::ALERT) {
            names.push("alert");
        }
        if self.contains(DeliveryFlags::REMOTE) {
            names.push("remote");
        }
        write!(f, "DeliveryFlags({})", names.join("|"))
    }
}
