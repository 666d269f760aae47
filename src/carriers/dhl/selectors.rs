//! Page locators for dhl.de shipment tracking.

use crate::browser::Locator;

/// Redirection options we recognise on the tracking page.
pub const ALLOWED_DELIVERY_OPTION_KEYS: &[&str] = &[
    "PREFERRED_LOCATION",
    "PREFERRED_DAY",
    "MERGED_LR_PACKSTATION_AND_BRANCH",
    "PREFERRED_NEIGHBOUR",
    "DELIVERY_CANCELLATION",
    "COLLECT_ON_INSTRUCTION",
];

/// Option key selected for a drop-off location.
pub const PREFERRED_LOCATION: &str = "PREFERRED_LOCATION";

pub fn tracking_url(tracking_number: &str, zip_code: &str) -> String {
    format!(
        "https://www.dhl.de/en/privatkunden/pakete-empfangen/verfolgen.html?piececode={tracking_number}&zip={zip_code}&lang=en"
    )
}

/// Shipment card; its presence means the page is usable.
pub fn shipment_container() -> Locator {
    Locator::css("article[class*='shipment']")
}

pub fn delivery_status(tracking_number: &str) -> Locator {
    Locator::css(format!(
        "section[data-testid='shipment-details'] article.shipment \
         div[data-shipment-id='{tracking_number}'] div[data-testid^='status-body_'] p > strong"
    ))
}

pub fn delivery_date() -> Locator {
    Locator::xpath("//*[contains(text(),'Estimated delivery')]/following-sibling::*")
}

pub fn delivered_texts() -> Locator {
    Locator::xpath(
        "//*[contains(text(),'delivered') or contains(text(),'zustellt') or contains(text(),'zugestellt')]",
    )
}

pub fn delivery_toggle() -> Locator {
    Locator::xpath("//section//button[contains(., 'You are not at home')]")
}

pub fn delivery_options() -> Locator {
    Locator::css("div.verfuegen-container ul li[data-name]")
}

pub fn history_entries() -> Locator {
    Locator::css("li[data-testid='shipment-course-entry']")
}

pub fn custom_dropoff_input() -> Locator {
    Locator::css(
        "div.shipmentServices form div.radioFormgroup.otherDropPoint input[type='text']",
    )
}

pub fn preferred_location_option() -> Locator {
    Locator::xpath(format!("//li[@data-name='{PREFERRED_LOCATION}']"))
}

pub fn dropoff_form() -> Locator {
    Locator::xpath("//form")
}

pub fn consent_checkbox() -> Locator {
    Locator::xpath("//input[@type='checkbox']")
}

pub fn confirm_button() -> Locator {
    Locator::xpath("//button[text()='Confirm']")
}

/// Whether a page text marks the shipment as delivered.
pub fn is_delivered_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["delivered", "zustellt", "zugestellt"]
        .iter()
        .any(|marker| lower.contains(marker))
}
