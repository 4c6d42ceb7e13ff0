//! Message rendering.
//!
//! SMS gets a single short line. Email gets a subject, a plain-text body and
//! an HTML body built from the same paragraphs.

use market_types::{
	format_money, MessageTemplate, NotificationChannel, Order, OutgoingMessage, RecipientRole,
};

/// Renders `template` for `order` on `channel`.
pub fn render(template: MessageTemplate, order: &Order, channel: NotificationChannel) -> OutgoingMessage {
	let paragraphs = body(template, order);
	let subject = subject(template, order);
	match channel {
		NotificationChannel::Sms => OutgoingMessage::text(subject, paragraphs.join(" ")),
		NotificationChannel::Email => {
			let html = paragraphs
				.iter()
				.map(|p| format!("<p>{}</p>", escape_html(p)))
				.collect::<Vec<_>>()
				.join("\n");
			OutgoingMessage {
				subject,
				text: paragraphs.join("\n\n"),
				html: Some(html),
			}
		},
	}
}

/// Address `role` should be reached at on `channel`, if the order has one.
pub fn recipient_address(order: &Order, role: RecipientRole, channel: NotificationChannel) -> Option<String> {
	match (role, channel) {
		(RecipientRole::Farmer, NotificationChannel::Sms) => order.farmer.phone.clone(),
		(RecipientRole::Farmer, NotificationChannel::Email) => order.farmer.email.clone(),
		(RecipientRole::Customer, NotificationChannel::Sms) => order.customer_info.phone.clone(),
		(RecipientRole::Customer, NotificationChannel::Email) => Some(order.customer_info.email.clone()),
	}
}

fn short_ref(order: &Order) -> String {
	order.id.chars().take(8).collect::<String>().to_uppercase()
}

fn item_line(order: &Order) -> String {
	let details = &order.order_details;
	format!(
		"{} {} of {} (total {})",
		details.quantity.normalize(),
		details.unit,
		details.product_name,
		format_money(details.total)
	)
}

fn subject(template: MessageTemplate, order: &Order) -> String {
	let reference = short_ref(order);
	match template {
		MessageTemplate::OrderConfirmation => format!("Order confirmation #{}", reference),
		MessageTemplate::NewOrderForFarmer => format!("New order #{}", reference),
		MessageTemplate::OrderCancelledFarmer | MessageTemplate::OrderCancelledCustomer => {
			format!("Order #{} cancelled", reference)
		},
		MessageTemplate::OrderShipped => format!("Order #{} shipped", reference),
		MessageTemplate::OrderDelivered => format!("Order #{} delivered", reference),
		MessageTemplate::StatusUpdate => format!("Order #{} is now {}", reference, order.status),
	}
}

fn body(template: MessageTemplate, order: &Order) -> Vec<String> {
	let reference = short_ref(order);
	let customer = &order.customer_info;
	let mut paragraphs = match template {
		MessageTemplate::OrderConfirmation => vec![
			format!("Hi {}, thank you for your order #{}.", customer.name, reference),
			format!("{} from {}.", item_line(order), order.farmer.name),
			format!("Delivery to: {}.", customer.delivery_address),
		],
		MessageTemplate::NewOrderForFarmer => vec![
			format!("New order #{}: {}.", reference, item_line(order)),
			format!(
				"Deliver to {} at {}.",
				customer.name, customer.delivery_address
			),
		],
		MessageTemplate::OrderCancelledFarmer => vec![format!(
			"Order #{} for {} has been cancelled. No need to fulfil it.",
			reference,
			item_line(order)
		)],
		MessageTemplate::OrderCancelledCustomer => vec![
			format!("Hi {}, your order #{} has been cancelled.", customer.name, reference),
			format!("Cancelled item: {}.", item_line(order)),
		],
		MessageTemplate::OrderShipped => vec![
			format!("Hi {}, your order #{} is on its way.", customer.name, reference),
			format!("{} will be delivered to {}.", item_line(order), customer.delivery_address),
		],
		MessageTemplate::OrderDelivered => vec![format!(
			"Hi {}, your order #{} has been delivered. Enjoy your produce from {}!",
			customer.name, reference, order.farmer.name
		)],
		MessageTemplate::StatusUpdate => vec![format!(
			"Order #{} ({}) is now {}.",
			reference,
			item_line(order),
			order.status
		)],
	};
	if let Some(note) = order
		.status_history
		.last()
		.and_then(|entry| entry.note.as_deref())
		.filter(|_| order.status_history.len() > 1)
	{
		paragraphs.push(format!("Note: {}", note));
	}
	paragraphs
}

fn escape_html(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#39;"),
			other => out.push(other),
		}
	}
	out
}
