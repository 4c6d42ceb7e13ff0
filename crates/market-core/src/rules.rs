//! Notification rule table.
//!
//! Which messages go out after a lifecycle step is data: a list of
//! [`NotificationRule`]s matched against `(from, to)` or against order
//! creation. The built-in table covers the usual farmer and customer
//! messages; configuration can add rows or replace the table outright.

use market_config::NotificationsConfig;
use market_types::{
	MessageTemplate, NotificationChannel, NotificationRule, OrderStatus, RecipientRole,
	StatusMatcher,
};

#[derive(Debug, Clone)]
pub struct RuleTable {
	rules: Vec<NotificationRule>,
}

impl RuleTable {
	/// Builds a table, dropping exact duplicates so a rule never produces
	/// two records for the same channel.
	pub fn new(rules: Vec<NotificationRule>) -> Self {
		let mut unique: Vec<NotificationRule> = Vec::with_capacity(rules.len());
		for rule in rules {
			if !unique.contains(&rule) {
				unique.push(rule);
			}
		}
		Self { rules: unique }
	}

	/// The built-in rules.
	pub fn default_rules() -> Vec<NotificationRule> {
		use MessageTemplate::*;
		use NotificationChannel::{Email, Sms};
		use RecipientRole::{Customer, Farmer};

		let cancellable = || StatusMatcher::AnyOf(vec![OrderStatus::Pending, OrderStatus::Processing]);
		vec![
			NotificationRule::on_created(Customer, Email, OrderConfirmation),
			NotificationRule::on_transition(
				StatusMatcher::any(),
				OrderStatus::Processing,
				Farmer,
				Sms,
				NewOrderForFarmer,
			),
			NotificationRule::on_transition(cancellable(), OrderStatus::Cancelled, Farmer, Sms, OrderCancelledFarmer),
			NotificationRule::on_transition(
				cancellable(),
				OrderStatus::Cancelled,
				Customer,
				Email,
				OrderCancelledCustomer,
			),
			NotificationRule::on_transition(
				StatusMatcher::One(OrderStatus::Processing),
				OrderStatus::Shipped,
				Customer,
				Email,
				OrderShipped,
			),
			NotificationRule::on_transition(
				StatusMatcher::One(OrderStatus::Shipped),
				OrderStatus::Delivered,
				Customer,
				Email,
				OrderDelivered,
			),
		]
	}

	/// Defaults plus configured rules, or only configured rules when
	/// `replace_default_rules` is set.
	pub fn from_config(config: &NotificationsConfig) -> Self {
		let mut rules = if config.replace_default_rules {
			Vec::new()
		} else {
			Self::default_rules()
		};
		rules.extend(config.rules.iter().cloned());
		Self::new(rules)
	}

	pub fn for_transition(&self, from: OrderStatus, to: OrderStatus) -> Vec<&NotificationRule> {
		self.rules
			.iter()
			.filter(|rule| rule.fires_on_transition(from, to))
			.collect()
	}

	pub fn for_creation(&self) -> Vec<&NotificationRule> {
		self.rules.iter().filter(|rule| rule.fires_on_creation()).collect()
	}

	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}
}

impl Default for RuleTable {
	fn default() -> Self {
		Self::new(Self::default_rules())
	}
}
