//! Built-in task bodies
//!
//! Integrations (SMTP, SMS gateway, push, payments, PDF) are outside the engine;
//! these bodies validate their arguments, log, and return a result document.

use courier_core::application::TaskRegistry;
use courier_core::domain::JobPayload;
use courier_core::error::Result;
use courier_core::port::{handler_fn, TaskContext, TaskError, TaskOutput};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

type TaskResult = std::result::Result<TaskOutput, TaskError>;

fn required<'a>(payload: &'a JobPayload, key: &str) -> std::result::Result<&'a Value, TaskError> {
    payload
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| TaskError::permanent(format!("missing required argument '{}'", key)))
}

fn required_str<'a>(
    payload: &'a JobPayload,
    key: &str,
) -> std::result::Result<&'a str, TaskError> {
    required(payload, key)?
        .as_str()
        .ok_or_else(|| TaskError::permanent(format!("argument '{}' must be a string", key)))
}

fn required_object<'a>(
    payload: &'a JobPayload,
    key: &str,
) -> std::result::Result<&'a Map<String, Value>, TaskError> {
    required(payload, key)?
        .as_object()
        .ok_or_else(|| TaskError::permanent(format!("argument '{}' must be an object", key)))
}

/// Field of a nested argument object
fn field<'a>(
    object: &'a Map<String, Value>,
    parent: &str,
    key: &str,
) -> std::result::Result<&'a Value, TaskError> {
    object
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| TaskError::permanent(format!("'{}' is missing '{}'", parent, key)))
}

/// Strings without quotes, everything else as JSON
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Every email body funnels through here
fn deliver_email(
    ctx: &TaskContext,
    to: &str,
    subject: &str,
    body: &str,
    html_body: Option<&str>,
) -> TaskOutput {
    info!(
        job_id = %ctx.job_id(),
        to = %to,
        subject = %subject,
        body_len = body.len(),
        html = html_body.is_some(),
        "Sending email"
    );
    json!({ "status": "sent", "to": to, "subject": subject })
}

async fn send_email(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let to = required_str(&payload, "to_email")?;
    let subject = required_str(&payload, "subject")?;
    let body = required_str(&payload, "body")?;
    let html_body = payload.get("html_body").and_then(Value::as_str);
    Ok(deliver_email(&ctx, to, subject, body, html_body))
}

async fn send_verification_email(
    payload: JobPayload,
    ctx: TaskContext,
    app_url: Arc<str>,
) -> TaskResult {
    let to = required_str(&payload, "to_email")?;
    let token = required_str(&payload, "verification_token")?;
    let user_name = required_str(&payload, "user_name")?;
    let url = format!("{}/verify-email/{}", app_url, token);

    let body = format!(
        "Hi {user_name},\n\nWelcome to SmartEats! Please verify your email address:\n\n{url}\n\n\
         This link will expire in 24 hours.\n\nIf you didn't create this account, please ignore this email.\n"
    );
    let html = format!(
        "<p>Hi {user_name},</p><p>Please verify your email address:</p>\
         <a href=\"{url}\">Verify Email</a><p>This link will expire in 24 hours.</p>"
    );
    Ok(deliver_email(
        &ctx,
        to,
        "Verify your SmartEats account",
        &body,
        Some(&html),
    ))
}

async fn send_password_reset_email(
    payload: JobPayload,
    ctx: TaskContext,
    app_url: Arc<str>,
) -> TaskResult {
    let to = required_str(&payload, "to_email")?;
    let token = required_str(&payload, "reset_token")?;
    let user_name = required_str(&payload, "user_name")?;
    let url = format!("{}/reset-password/{}", app_url, token);

    let body = format!(
        "Hi {user_name},\n\nYou requested to reset your password:\n\n{url}\n\n\
         This link will expire in 1 hour.\n\nIf you didn't request this, please ignore this email.\n"
    );
    let html = format!(
        "<p>Hi {user_name},</p><p>You requested to reset your password.</p>\
         <a href=\"{url}\">Reset Password</a><p>This link will expire in 1 hour.</p>"
    );
    Ok(deliver_email(
        &ctx,
        to,
        "Reset your SmartEats password",
        &body,
        Some(&html),
    ))
}

async fn send_order_confirmation(
    payload: JobPayload,
    ctx: TaskContext,
    app_url: Arc<str>,
) -> TaskResult {
    let to = required_str(&payload, "to_email")?;
    let order = required_object(&payload, "order_data")?;
    let number = text(field(order, "order_data", "orderNumber")?);
    let customer = text(field(order, "order_data", "customerName")?);
    let restaurant = text(field(order, "order_data", "restaurantName")?);
    let total = text(field(order, "order_data", "total")?);
    let eta = text(field(order, "order_data", "estimatedDelivery")?);
    let order_id = text(field(order, "order_data", "orderId")?);

    let subject = format!("Order Confirmation - #{}", number);
    let body = format!(
        "Hi {customer},\n\nYour order has been confirmed!\n\n\
         Order Number: #{number}\nRestaurant: {restaurant}\nTotal: ${total}\n\
         Estimated Delivery: {eta}\n\nTrack your order at: {app_url}/order-tracking/{order_id}\n"
    );
    Ok(deliver_email(&ctx, to, &subject, &body, None))
}

async fn send_sms(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let phone = required_str(&payload, "phone")?;
    required_str(&payload, "message")?;
    info!(job_id = %ctx.job_id(), phone = %phone, "Sending SMS");
    Ok(json!({ "status": "sent", "to": phone }))
}

async fn process_order(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let order_id = required(&payload, "order_id")?;
    let restaurant_id = required(&payload, "restaurant_id")?;
    info!(
        job_id = %ctx.job_id(),
        order_id = %order_id,
        restaurant_id = %restaurant_id,
        "Processing order"
    );
    Ok(json!({ "order_id": order_id, "status": "processed" }))
}

async fn assign_driver(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let order_id = required(&payload, "order_id")?;
    let location = required(&payload, "location")?;
    info!(
        job_id = %ctx.job_id(),
        order_id = %order_id,
        location = %location,
        "Assigning driver"
    );
    Ok(json!({ "order_id": order_id, "driver_assigned": true }))
}

async fn send_notification(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let user_id = required(&payload, "user_id")?;
    let kind = required_str(&payload, "notification_type")?;
    info!(
        job_id = %ctx.job_id(),
        user_id = %user_id,
        notification_type = %kind,
        "Sending notification"
    );
    Ok(json!({ "user_id": user_id, "sent": true }))
}

async fn send_batch_notifications(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let user_ids = required(&payload, "user_ids")?
        .as_array()
        .ok_or_else(|| TaskError::permanent("argument 'user_ids' must be an array"))?;
    required_object(&payload, "notification_data")?;

    let total = user_ids.len();
    info!(job_id = %ctx.job_id(), users = total, "Sending batch notifications");

    for (i, user_id) in user_ids.iter().enumerate() {
        if ctx.is_cancelled() {
            return Err(TaskError::transient(format!(
                "stopped after {} of {} notifications",
                i, total
            )));
        }
        tracing::debug!(job_id = %ctx.job_id(), user_id = %user_id, "Notification queued");
        ctx.report_progress(((i + 1) * 100 / total) as u8, None);
    }
    Ok(json!({ "sent": total, "failed": 0 }))
}

async fn process_refund(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let payment_id = required(&payload, "payment_id")?;
    let amount = required(&payload, "amount")?
        .as_f64()
        .filter(|a| *a > 0.0)
        .ok_or_else(|| TaskError::permanent("argument 'amount' must be a positive number"))?;
    let reason = required_str(&payload, "reason")?;
    info!(
        job_id = %ctx.job_id(),
        payment_id = %payment_id,
        amount = amount,
        reason = %reason,
        "Processing refund"
    );
    Ok(json!({ "payment_id": payment_id, "amount": amount, "status": "pending" }))
}

async fn generate_invoice(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let order_id = required(&payload, "order_id")?;
    required_object(&payload, "order_data")?;
    info!(job_id = %ctx.job_id(), order_id = %order_id, "Generating invoice");
    Ok(json!({ "order_id": order_id, "status": "pending" }))
}

async fn calculate_restaurant_analytics(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    let restaurant_id = required(&payload, "restaurant_id")?;
    let start = required_str(&payload, "start_date")?;
    let end = required_str(&payload, "end_date")?;
    info!(
        job_id = %ctx.job_id(),
        restaurant_id = %restaurant_id,
        start = %start,
        end = %end,
        "Calculating restaurant analytics"
    );
    Ok(json!({
        "restaurant_id": restaurant_id,
        "period": { "start": start, "end": end },
        "metrics": {
            "total_orders": 0,
            "total_revenue": 0,
            "average_order_value": 0,
            "top_items": [],
        },
    }))
}

async fn cleanup_expired_orders(_payload: JobPayload, ctx: TaskContext) -> TaskResult {
    info!(job_id = %ctx.job_id(), "Cleaning up expired orders");
    Ok(json!({ "cleaned": 0 }))
}

async fn cleanup_expired_tokens(_payload: JobPayload, ctx: TaskContext) -> TaskResult {
    info!(job_id = %ctx.job_id(), "Cleaning up expired tokens");
    Ok(json!({ "cleaned": 0 }))
}

/// Per-restaurant report when `restaurant_id` is given, platform report for `date` otherwise
async fn generate_daily_report(payload: JobPayload, ctx: TaskContext) -> TaskResult {
    if let Some(restaurant_id) = payload.get("restaurant_id").filter(|v| !v.is_null()) {
        info!(job_id = %ctx.job_id(), restaurant_id = %restaurant_id, "Generating daily report");
        ctx.report_progress(100, Some("report generated".to_string()));
        return Ok(json!({ "restaurant_id": restaurant_id, "report_generated": true }));
    }

    let date = payload
        .get("date")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::permanent("either 'restaurant_id' or 'date' is required"))?;
    info!(job_id = %ctx.job_id(), date = %date, "Generating platform daily report");
    ctx.report_progress(100, Some("report generated".to_string()));
    Ok(json!({ "status": "completed", "date": date }))
}

/// Registry with every built-in task
///
/// `customer_app_url` is the base for links in customer emails.
pub fn builtin_registry(customer_app_url: &str) -> Result<TaskRegistry> {
    let app_url: Arc<str> = Arc::from(customer_app_url.trim_end_matches('/'));
    let mut registry = TaskRegistry::new();

    registry.register("send_email", handler_fn(send_email))?;
    let url = app_url.clone();
    registry.register(
        "send_verification_email",
        handler_fn(move |payload, ctx| send_verification_email(payload, ctx, url.clone())),
    )?;
    let url = app_url.clone();
    registry.register(
        "send_password_reset_email",
        handler_fn(move |payload, ctx| send_password_reset_email(payload, ctx, url.clone())),
    )?;
    let url = app_url;
    registry.register(
        "send_order_confirmation",
        handler_fn(move |payload, ctx| send_order_confirmation(payload, ctx, url.clone())),
    )?;

    registry.register("send_sms", handler_fn(send_sms))?;
    registry.register("send_notification", handler_fn(send_notification))?;
    registry.register("send_batch_notifications", handler_fn(send_batch_notifications))?;
    registry.register("process_order", handler_fn(process_order))?;
    registry.register("assign_driver", handler_fn(assign_driver))?;
    registry.register("process_refund", handler_fn(process_refund))?;
    registry.register("generate_invoice", handler_fn(generate_invoice))?;
    registry.register(
        "calculate_restaurant_analytics",
        handler_fn(calculate_restaurant_analytics),
    )?;
    registry.register("cleanup_expired_orders", handler_fn(cleanup_expired_orders))?;
    registry.register("cleanup_expired_tokens", handler_fn(cleanup_expired_tokens))?;
    registry.register("generate_daily_report", handler_fn(generate_daily_report))?;
    Ok(registry)
}
