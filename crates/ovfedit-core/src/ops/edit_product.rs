//! Edit product information in the ProductSection.

use log::debug;

use crate::error::Result;
use crate::ovf::Ovf;
use crate::session::Session;

/// Options for the edit-product operation. Unset fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct EditProductOptions {
    pub product: Option<String>,
    pub vendor: Option<String>,
    pub version_short: Option<String>,
    pub version_long: Option<String>,
    pub product_url: Option<String>,
    pub vendor_url: Option<String>,
    pub application_url: Option<String>,
    pub product_class: Option<String>,
}

/// Apply product edits to the descriptor.
pub fn run(ovf: &mut Ovf, options: &EditProductOptions, session: &Session) -> Result<()> {
    session.check_cancelled()?;
    if let Some(value) = &options.product_class {
        debug!("Setting product class to {}", value);
        ovf.set_product_class(value);
    }
    if let Some(value) = &options.product {
        ovf.set_product(value);
    }
    if let Some(value) = &options.vendor {
        ovf.set_vendor(value);
    }
    if let Some(value) = &options.version_short {
        ovf.set_version_short(value);
    }
    if let Some(value) = &options.version_long {
        ovf.set_version_long(value);
    }
    if let Some(value) = &options.product_url {
        ovf.set_product_url(value);
    }
    if let Some(value) = &options.vendor_url {
        ovf.set_vendor_url(value);
    }
    if let Some(value) = &options.application_url {
        ovf.set_application_url(value);
    }
    Ok(())
}
