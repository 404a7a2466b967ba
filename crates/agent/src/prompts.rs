//! Fixed caller-facing utterances

use chrono::{Local, Timelike};

/// Salutation for the hour of day (0-23)
pub fn time_of_day_greeting(hour: u32) -> &'static str {
    match hour {
        4..=11 => "Good morning",
        12..=15 => "Good afternoon",
        16..=19 => "Good evening",
        _ => "Hello",
    }
}

pub fn welcome(id_length: usize) -> String {
    let hour = Local::now().hour();
    format!(
        "{}! Thank you for calling customer support. \
         Please enter the {}-digit phone number registered with your connection.",
        time_of_day_greeting(hour),
        id_length
    )
}

pub fn greet_customer(first_name: &str) -> String {
    format!(
        "Hello {}! Nice to hear from you. What seems to be the problem today?",
        first_name
    )
}

pub const GREET_UNVERIFIED: &str =
    "Thank you. What seems to be the problem with your connection today?";

pub fn wrong_length(id_length: usize) -> String {
    format!(
        "Sorry, we need a {}-digit phone number. Please enter the full number.",
        id_length
    )
}

pub fn number_cleared(id_length: usize) -> String {
    format!(
        "The number has been cleared. Please enter your {}-digit phone number again.",
        id_length
    )
}

pub const UNKNOWN_CUSTOMER: &str = "Sorry, we could not find that phone number in our system. \
     Please check the number and enter it again.";

pub const CLARIFY_ISSUE: &str =
    "Could you tell me a little more about the problem you are facing?";

pub const APOLOGY: &str = "Sorry, I had a little trouble there.";

pub const RESOLVED: &str = "Great, I'm glad that fixed it. \
     If the problem comes back, please call us again. Thank you for calling!";

pub fn escalated(reference: &str) -> String {
    format!(
        "I'm passing your case to our technical team. Your reference number is {}. \
         A technician will contact you shortly.",
        reference
    )
}

pub const ESCALATED_NO_TICKET: &str =
    "I'm passing your case to our technical team. A technician will contact you shortly.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day_greeting() {
        assert_eq!(time_of_day_greeting(4), "Good morning");
        assert_eq!(time_of_day_greeting(12), "Good afternoon");
        assert_eq!(time_of_day_greeting(19), "Good evening");
        assert_eq!(time_of_day_greeting(23), "Hello");
        assert_eq!(time_of_day_greeting(2), "Hello");
    }
}
