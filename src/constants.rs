//! Raw command identifiers of the P02 protocol, one table per namespace.
//!
//! These are the bare wire values. Code that dispatches on them goes through
//! [`crate::command::classify`] instead of comparing numbers.

/// Generic link-control commands shared by all device families.
pub mod base {
    pub const M_HS: u8 = 0;
    pub const M_ACK: u8 = 6;
    pub const M_NACK: u8 = 21;
    pub const M_SYN: u8 = 22;
    pub const M_RESET: u8 = 32;
    pub const M_FIRMWARE: u8 = 33;
}

/// Fume extractor family (FE_02).
pub mod fe02 {
    pub const M_HS: u8 = 0;
    pub const M_EOT: u8 = 4;
    pub const M_ACK: u8 = 6;
    pub const M_NACK: u8 = 21;
    pub const M_SYN: u8 = 22;
    pub const M_R_DEVICEIDORIGINAL: u8 = 28;
    pub const M_R_DISCOVER: u8 = 29;
    pub const M_R_DEVICEID: u8 = 30;
    pub const M_W_DEVICEID: u8 = 31;
    pub const M_RESET: u8 = 32;
    pub const M_FIRMWARE: u8 = 33;
    pub const M_CLEARMEMFLASH: u8 = 34;
    pub const M_SENDMEMADDRESS: u8 = 35;
    pub const M_SENDMEMDATA: u8 = 36;
    pub const M_ENDPROGR: u8 = 37;
    pub const M_ENDUPD: u8 = 38;
    pub const M_CONTINUEUPD: u8 = 39;
    pub const M_CLEARING: u8 = 40;
    pub const M_FORCEUPDATE: u8 = 41;
    pub const M_R_SUCTIONLEVEL: u8 = 48;
    pub const M_W_SUCTIONLEVEL: u8 = 49;
    pub const M_R_FLOW: u8 = 50;
    pub const M_R_SPEED: u8 = 51;
    pub const M_R_SELECTFLOW: u8 = 52;
    pub const M_W_SELECTFLOW: u8 = 53;
    pub const M_R_STANDINTAKES: u8 = 54;
    pub const M_W_STANDINTAKES: u8 = 55;
    pub const M_R_INTAKEACTIVATION: u8 = 56;
    pub const M_W_INTAKEACTIVATION: u8 = 57;
    pub const M_R_SUCTIONDELAY: u8 = 58;
    pub const M_W_SUCTIONDELAY: u8 = 59;
    pub const M_R_DELAYTIME: u8 = 60;
    pub const M_R_ACTIVATIONPEDAL: u8 = 61;
    pub const M_W_ACTIVATIONPEDAL: u8 = 62;
    pub const M_R_PEDALMODE: u8 = 63;
    pub const M_W_PEDALMODE: u8 = 64;
    pub const M_R_FILTERSTATUS: u8 = 65;
    pub const M_R_RESETFILTER: u8 = 66;
    pub const M_R_CONNECTEDPEDAL: u8 = 68;
    pub const M_R_FILTERSAT: u8 = 69;
    pub const M_RESETSTATION: u8 = 80;
    pub const M_R_PIN: u8 = 81;
    pub const M_W_PIN: u8 = 82;
    pub const M_R_STATIONLOCKED: u8 = 83;
    pub const M_W_STATIONLOCKED: u8 = 84;
    pub const M_R_BEEP: u8 = 85;
    pub const M_W_BEEP: u8 = 86;
    pub const M_R_CONTINUOUSSUCTION: u8 = 87;
    pub const M_W_CONTINUOUSSUCTION: u8 = 88;
    pub const M_R_STATERROR: u8 = 89;
    pub const M_R_DEVICENAME: u8 = 91;
    pub const M_W_DEVICENAME: u8 = 92;
    pub const M_R_PINENABLED: u8 = 93;
    pub const M_W_PINENABLED: u8 = 94;
    pub const M_W_WORKINTAKES: u8 = 96;
    pub const M_R_COUNTERS: u8 = 192;
    pub const M_R_RESETCOUNTERS: u8 = 193;
    pub const M_R_COUNTERSP: u8 = 194;
    pub const M_R_RESETCOUNTERSP: u8 = 195;
    pub const M_R_USB_CONNECTSTATUS: u8 = 224;
    pub const M_W_USB_CONNECTSTATUS: u8 = 225;
    pub const M_R_RBT_CONNCONFIG: u8 = 240;
    pub const M_W_RBT_CONNCONFIG: u8 = 241;
    pub const M_R_RBT_CONNECTSTATUS: u8 = 242;
    pub const M_W_RBT_CONNECTSTATUS: u8 = 243;
}

/// Every FE_02 identifier, in table order.
pub const FE02_TABLE: &[u8] = &[
    fe02::M_HS,
    fe02::M_EOT,
    fe02::M_ACK,
    fe02::M_NACK,
    fe02::M_SYN,
    fe02::M_R_DEVICEIDORIGINAL,
    fe02::M_R_DISCOVER,
    fe02::M_R_DEVICEID,
    fe02::M_W_DEVICEID,
    fe02::M_RESET,
    fe02::M_FIRMWARE,
    fe02::M_CLEARMEMFLASH,
    fe02::M_SENDMEMADDRESS,
    fe02::M_SENDMEMDATA,
    fe02::M_ENDPROGR,
    fe02::M_ENDUPD,
    fe02::M_CONTINUEUPD,
    fe02::M_CLEARING,
    fe02::M_FORCEUPDATE,
    fe02::M_R_SUCTIONLEVEL,
    fe02::M_W_SUCTIONLEVEL,
    fe02::M_R_FLOW,
    fe02::M_R_SPEED,
    fe02::M_R_SELECTFLOW,
    fe02::M_W_SELECTFLOW,
    fe02::M_R_STANDINTAKES,
    fe02::M_W_STANDINTAKES,
    fe02::M_R_INTAKEACTIVATION,
    fe02::M_W_INTAKEACTIVATION,
    fe02::M_R_SUCTIONDELAY,
    fe02::M_W_SUCTIONDELAY,
    fe02::M_R_DELAYTIME,
    fe02::M_R_ACTIVATIONPEDAL,
    fe02::M_W_ACTIVATIONPEDAL,
    fe02::M_R_PEDALMODE,
    fe02::M_W_PEDALMODE,
    fe02::M_R_FILTERSTATUS,
    fe02::M_R_RESETFILTER,
    fe02::M_R_CONNECTEDPEDAL,
    fe02::M_R_FILTERSAT,
    fe02::M_RESETSTATION,
    fe02::M_R_PIN,
    fe02::M_W_PIN,
    fe02::M_R_STATIONLOCKED,
    fe02::M_W_STATIONLOCKED,
    fe02::M_R_BEEP,
    fe02::M_W_BEEP,
    fe02::M_R_CONTINUOUSSUCTION,
    fe02::M_W_CONTINUOUSSUCTION,
    fe02::M_R_STATERROR,
    fe02::M_R_DEVICENAME,
    fe02::M_W_DEVICENAME,
    fe02::M_R_PINENABLED,
    fe02::M_W_PINENABLED,
    fe02::M_W_WORKINTAKES,
    fe02::M_R_COUNTERS,
    fe02::M_R_RESETCOUNTERS,
    fe02::M_R_COUNTERSP,
    fe02::M_R_RESETCOUNTERSP,
    fe02::M_R_USB_CONNECTSTATUS,
    fe02::M_W_USB_CONNECTSTATUS,
    fe02::M_R_RBT_CONNCONFIG,
    fe02::M_W_RBT_CONNCONFIG,
    fe02::M_R_RBT_CONNECTSTATUS,
    fe02::M_W_RBT_CONNECTSTATUS,
];

/// Every BASE identifier, in table order.
pub const BASE_TABLE: &[u8] = &[
    base::M_HS,
    base::M_ACK,
    base::M_NACK,
    base::M_SYN,
    base::M_RESET,
    base::M_FIRMWARE,
];
