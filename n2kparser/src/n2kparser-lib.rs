/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *  https://github.com/canboat/canboat
 *  https://www.nmea.org/nmea-2000.html
 */

#![doc(
    html_logo_url = "https://iot.bzh/images/defaults/company/512-479-max-transp.png",
    html_favicon_url = "https://iot.bzh/images/defaults/favicon.ico"
)]

#[path = "./model-mod.rs"]
mod model;

#[path = "./dialect-parser.rs"]
mod dialect;

#[path = "./compile-mod.rs"]
mod compile;

#[path = "./bitcodec-mod.rs"]
mod bitcodec;

#[path = "./codec-mod.rs"]
mod codec;

#[path = "./sequence-mod.rs"]
mod sequence;

#[path = "./fastpacket-mod.rs"]
mod fastpacket;

#[path = "./packer-mod.rs"]
mod packer;

#[path = "./handler-mod.rs"]
mod handler;

#[path = "./schema-mod.rs"]
mod schema;

#[path = "./factory-mod.rs"]
mod factory;

pub mod prelude {
    pub use crate::bitcodec::*;
    pub use crate::codec::*;
    pub use crate::compile::*;
    pub use crate::dialect::*;
    pub use crate::factory::*;
    pub use crate::fastpacket::*;
    pub use crate::handler::*;
    pub use crate::model::*;
    pub use crate::packer::*;
    pub use crate::schema::*;
    pub use crate::sequence::*;
}
