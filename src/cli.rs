use crate::{
    access::{self, Access, Route},
    audit,
    config::Config,
    error::GatewayError,
    gateway::{Gateway, LoginRedirect},
    loan::{self, LoanApplication, SubmitOutcome},
    session::{LoginRequest, RegisterRequest, SessionManager},
    token, Command,
};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

pub struct Context {
    pub config: Config,
    pub gateway: Gateway,
}

impl Context {
    fn session(&self) -> &SessionManager {
        self.gateway.session()
    }
}

/// Login entry point for a terminal user
pub struct TerminalRedirect;

impl LoginRedirect for TerminalRedirect {
    fn redirect_to_login(&self) {
        eprintln!("Your session has expired. Run `loandesk login` to sign in again.");
    }
}

pub fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let session = ctx.session().login(&LoginRequest { username, password })?;
            println!(
                "Logged in as {} ({})",
                session.user.display_name(),
                session.user.role
            );
        }
        Command::Register {
            first_name,
            last_name,
            email,
            password,
            phone,
        } => {
            let session = ctx.session().register(&RegisterRequest {
                first_name,
                last_name,
                email,
                password,
                phone,
            })?;
            println!("Registered and logged in as {}", session.user.email);
        }
        Command::Logout => {
            ctx.session().logout()?;
            println!("Logged out");
        }
        Command::Status => print_status(ctx),
        Command::Refresh => {
            let session = ctx.session().refresh()?;
            println!("Session refreshed");
            if let Some(exp) = token::expiry(&session.token) {
                println!("Token expires: {}", describe_expiry(exp, Utc::now().timestamp()));
            }
        }
        Command::Apply {
            loan_type,
            amount,
            tenure_months,
            monthly_income,
            purpose,
        } => {
            require(ctx, Route::Apply)?;
            let application = LoanApplication {
                loan_type,
                amount,
                tenure_months,
                monthly_income,
                purpose,
            };
            apply(ctx, &application)?;
        }
        Command::Audit { limit } => {
            require(ctx, Route::Audit)?;
            let path = ctx.config.audit_path();
            let entries = audit::read_tail(&path, limit)?;
            if entries.is_empty() {
                println!("No audit events in {}", path.display());
            }
            for entry in entries {
                let data = serde_json::Value::Object(entry.data);
                println!(
                    "{}  {:<16} {}  {}",
                    entry.ts.format("%Y-%m-%d %H:%M:%S"),
                    entry.event_type,
                    entry.run_id,
                    data
                );
            }
        }
    }
    Ok(())
}

fn require(ctx: &Context, route: Route) -> Result<()> {
    match access::check(route, ctx.session().user().as_ref()) {
        Access::Granted => Ok(()),
        Access::LoginRequired => bail!("Not logged in. Run `loandesk login` first."),
        Access::Forbidden => bail!(
            "Your role does not have access to '{}'",
            route.as_str()
        ),
    }
}

fn apply(ctx: &Context, application: &LoanApplication) -> Result<()> {
    match loan::submit(&ctx.gateway, application) {
        Ok(SubmitOutcome::Submitted {
            message,
            application_id,
        }) => {
            println!("{}", message);
            if let Some(id) = application_id {
                println!("Application ID: {}", id);
            }
            Ok(())
        }
        Ok(SubmitOutcome::Ineligible { title, message }) => {
            println!("{}: {}", title, message);
            Ok(())
        }
        Err(GatewayError::Api(api)) if api.is_validation() => {
            eprintln!("{}", api.message);
            for detail in api.details.iter().flatten() {
                let field = detail
                    .field
                    .as_deref()
                    .or(detail.path.as_deref())
                    .unwrap_or("-");
                eprintln!("  {}: {}", field, detail.message);
            }
            bail!("Application rejected ({})", api.status)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_status(ctx: &Context) {
    let session = ctx.session();
    println!("API: {}", ctx.config.api.base_url);
    println!("State: {}", session.state().as_str());

    let Some(current) = session.session() else {
        return;
    };
    let user = &current.user;
    println!(
        "User: {} <{}> (role: {}, id: {})",
        user.display_name(),
        user.email,
        user.role,
        user.id.as_deref().unwrap_or("-")
    );
    match token::expiry(&current.token) {
        Some(exp) => println!("Token expires: {}", describe_expiry(exp, Utc::now().timestamp())),
        None => println!("Token expires: unknown"),
    }

    let areas: Vec<String> = [Route::Apply, Route::Admin, Route::Audit]
        .iter()
        .map(|r| {
            let verdict = match access::check(*r, Some(user)) {
                Access::Granted => "yes",
                Access::LoginRequired | Access::Forbidden => "no",
            };
            format!("{}={}", r.as_str(), verdict)
        })
        .collect();
    println!("Access: {}", areas.join(" "));
}

fn describe_expiry(exp: i64, now: i64) -> String {
    let when = DateTime::<Utc>::from_timestamp(exp, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| exp.to_string());
    let remaining = exp - now;
    if remaining <= 0 {
        format!("{} (expired)", when)
    } else if remaining < 3600 {
        format!("{} (in {}m {}s)", when, remaining / 60, remaining % 60)
    } else {
        format!("{} (in {}h {}m)", when, remaining / 3600, (remaining % 3600) / 60)
    }
}
