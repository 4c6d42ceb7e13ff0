//! Formatting helpers shared by logging and message rendering.

use rust_decimal::Decimal;

/// Shortens an id for log output: the first 8 characters followed by "..".
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}

/// Hides most of a phone number or email address for log output.
///
/// `+15550001234` becomes `***1234`, `asha@example.com` becomes
/// `a***@example.com`.
pub fn mask_recipient(recipient: &str) -> String {
	if let Some((local, domain)) = recipient.split_once('@') {
		let first: String = local.chars().take(1).collect();
		return format!("{}***@{}", first, domain);
	}
	let digits: Vec<char> = recipient.chars().collect();
	if digits.len() <= 4 {
		return "***".to_string();
	}
	let tail: String = digits[digits.len() - 4..].iter().collect();
	format!("***{}", tail)
}

/// Renders an amount with exactly two decimal places.
pub fn format_money(amount: Decimal) -> String {
	format!("{:.2}", amount.round_dp(2))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("short"), "short");
		assert_eq!(truncate_id("0123456789abcdef"), "01234567..");
	}

	#[test]
	fn test_mask_recipient() {
		assert_eq!(mask_recipient("+15550001234"), "***1234");
		assert_eq!(mask_recipient("asha@example.com"), "a***@example.com");
		assert_eq!(mask_recipient("12"), "***");
	}

	#[test]
	fn test_format_money() {
		assert_eq!(format_money(Decimal::new(1005, 1)), "100.50");
		assert_eq!(format_money(Decimal::from(7)), "7.00");
	}
}
