use crate::{
    auth::Authenticator,
    cart::{self, CartApi, CartItem},
    config::Config,
    guard::RouteGuard,
    session::{CartSync, Role, Session},
    transcript::Transcript,
};
use anyhow::{anyhow, bail, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::path::PathBuf;

/// Application root: owns the session and every collaborator commands need
pub struct Context {
    pub state_dir: PathBuf,
    pub transcript: RefCell<Transcript>,
    pub session_id: String,
    pub tracing: RefCell<bool>,
    pub config: Config,
    pub session: RefCell<Session>,
    pub guard: RouteGuard,
    pub authenticator: Box<dyn Authenticator>,
    pub cart_api: Box<dyn CartApi>,
}

fn trace(ctx: &Context, label: &str, content: &str) {
    if *ctx.tracing.borrow() {
        eprintln!("[TRACE:{}] {}", label, content);
    }
}

pub fn run_once(ctx: &Context, command: &str) -> Result<()> {
    handle_command(ctx, command)?;
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("bistro - type /help for commands, /exit to quit");
    print_whoami(&ctx);

    loop {
        match rl.readline("bistro> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                match handle_command(&ctx, line) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// Execute one command line. Returns true when the shell should exit.
pub fn handle_command(ctx: &Context, line: &str) -> Result<bool> {
    let parts = shell_words::split(line).map_err(|e| anyhow!("Bad quoting: {}", e))?;
    let Some(cmd) = parts.first() else {
        return Ok(false);
    };
    let args = &parts[1..];

    match cmd.as_str() {
        "/exit" | "/quit" => return Ok(true),
        "/help" => print_help(),
        "/session" => {
            println!("Session: {}", ctx.session_id);
            println!("Transcript: {:?}", ctx.transcript.borrow().path);
            println!("State dir: {:?}", ctx.state_dir);
            println!("API: {}", ctx.config.api.base_url());
            let token = ctx.session.borrow().token().map(str::len);
            match token {
                Some(len) => println!("Token: {} chars", len),
                None => println!("Token: none"),
            }
        }
        "/trace" => {
            let mut t = ctx.tracing.borrow_mut();
            *t = !*t;
            println!("Tracing: {}", if *t { "on" } else { "off" });
        }
        "/login" => cmd_login(ctx, args)?,
        "/logout" => cmd_logout(ctx),
        "/whoami" => print_whoami(ctx),
        "/lang" => cmd_preference(ctx, "language", args),
        "/currency" => cmd_preference(ctx, "currency", args),
        "/open" => {
            let [path] = args else {
                bail!("Usage: /open <path>");
            };
            cmd_open(ctx, path);
        }
        "/can" => cmd_can(ctx, args)?,
        "/branch" => {
            let [id] = args else {
                bail!("Usage: /branch <id>");
            };
            let id: i64 = id
                .parse()
                .map_err(|_| anyhow!("Invalid branch id: {}", id))?;
            let allowed = ctx.session.borrow().has_branch_access(id);
            println!("Branch {}: {}", id, if allowed { "allowed" } else { "denied" });
        }
        "/routes" => {
            println!("Protected routes:");
            for route in ctx.guard.routes() {
                let roles = if route.roles.is_empty() {
                    "any signed-in user".to_string()
                } else {
                    route
                        .roles
                        .iter()
                        .map(|r| r.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                println!("  {}: {}", route.path, roles);
            }
        }
        "/cart" => cmd_cart(ctx, args)?,
        other if !other.starts_with('/') => {
            println!("Commands start with '/'. Type /help for a list.");
        }
        other => println!("Unknown command: {}", other),
    }
    Ok(false)
}

fn print_help() {
    println!("Commands:");
    println!("  /exit                 - quit");
    println!("  /help                 - show commands");
    println!("  /session              - show session info");
    println!("  /trace                - toggle tracing");
    println!("Account:");
    println!("  /login <user> <pass>  - sign in");
    println!("  /logout               - sign out");
    println!("  /whoami               - show current user and preferences");
    println!("  /lang [code]          - get/set language");
    println!("  /currency [code]      - get/set currency");
    println!("Access:");
    println!("  /open <path>          - check whether a view would render");
    println!("  /can <ROLE>...        - check role membership");
    println!("  /branch <id>          - check branch access");
    println!("  /routes               - list protected routes");
    println!("Cart:");
    println!("  /cart                 - show the local cart");
    println!("  /cart add <menuItemId> <qty> [name] [price]");
    println!("  /cart clear");
}

fn print_whoami(ctx: &Context) {
    let session = ctx.session.borrow();
    match session.user() {
        Some(user) => {
            let branch = user
                .branch_id
                .map(|b| format!(", branch {}", b))
                .unwrap_or_default();
            println!(
                "Signed in as {} (#{}, {}{})",
                user.username, user.id, user.role, branch
            );
            if user.role.is_branch_scoped() && user.branch_id.is_none() {
                println!("Warning: no branch assigned; branch views will redirect");
            }
        }
        None => println!("Not signed in"),
    }
    println!(
        "Language: {}  Currency: {}",
        session.language(),
        session.currency()
    );
}

fn cmd_login(ctx: &Context, args: &[String]) -> Result<()> {
    let [username, password] = args else {
        bail!("Usage: /login <username> <password>");
    };

    trace(ctx, "auth", &format!("POST /api/auth/login as {}", username));
    let resp = match ctx.authenticator.authenticate(username, password) {
        Ok(resp) => resp,
        Err(e) => {
            let _ = ctx
                .transcript
                .borrow_mut()
                .login_failed(username, &format!("{:#}", e));
            return Err(e);
        }
    };

    let user = resp.user.clone();
    let _ = ctx.transcript.borrow_mut().login(&user);

    let outcome = ctx
        .session
        .borrow_mut()
        .login(resp.token, resp.user, ctx.cart_api.as_ref());
    let _ = ctx.transcript.borrow_mut().cart_sync(&outcome);

    println!("Signed in as {} ({})", user.username, user.role);
    match &outcome {
        CartSync::Skipped => {}
        CartSync::Replaced { items, push_failed } => {
            if *push_failed {
                println!("Cart: local items could not be merged");
            }
            println!("Cart: {} item(s) from server", items);
        }
        CartSync::Abandoned(reason) => {
            trace(ctx, "cart", reason);
            println!("Cart: not synced");
        }
    }
    println!("Landing: {}", user.role.dashboard_path());
    Ok(())
}

fn cmd_logout(ctx: &Context) {
    let mut session = ctx.session.borrow_mut();
    let Some(username) = session.user().map(|u| u.username.clone()) else {
        println!("Not signed in");
        return;
    };
    session.logout();
    let _ = ctx.transcript.borrow_mut().logout(Some(&username));
    println!("Signed out {}", username);
}

fn cmd_preference(ctx: &Context, name: &str, args: &[String]) {
    let mut session = ctx.session.borrow_mut();
    match args.first() {
        Some(value) => {
            if name == "language" {
                session.set_language(value);
            } else {
                session.set_currency(value);
            }
            let _ = ctx.transcript.borrow_mut().preference(name, value);
            println!("{}: {}", name, value);
        }
        None => {
            let value = if name == "language" {
                session.language()
            } else {
                session.currency()
            };
            println!("{}: {}", name, value);
        }
    }
}

fn cmd_open(ctx: &Context, path: &str) {
    let session = ctx.session.borrow();
    let (decision, route) = ctx.guard.check(&session, path);
    let matched = route.map(|r| r.path.as_str());
    let _ = ctx
        .transcript
        .borrow_mut()
        .guard_decision(path, decision, matched);

    if let Some(pattern) = matched {
        trace(ctx, "guard", &format!("{} matched {}", path, pattern));
    }
    match decision.redirect_target() {
        None => println!("{}: render", path),
        Some(target) => println!("{}: {} -> {}", path, decision.as_str(), target),
    }
}

fn parse_roles(args: &[String]) -> Result<Vec<Role>> {
    args.iter()
        .map(|a| {
            Role::from_str(a).ok_or_else(|| {
                let known: Vec<&str> = Role::ALL.iter().map(|r| r.as_str()).collect();
                anyhow!("Unknown role: {} (expected one of {})", a, known.join(", "))
            })
        })
        .collect()
}

fn cmd_can(ctx: &Context, args: &[String]) -> Result<()> {
    let roles = parse_roles(args)?;
    let allowed = ctx.session.borrow().has_permission(&roles);
    println!("{}", if allowed { "yes" } else { "no" });
    Ok(())
}

fn cmd_cart(ctx: &Context, args: &[String]) -> Result<()> {
    let session = ctx.session.borrow();
    let storage = session.storage();

    match args.first().map(String::as_str) {
        None => {
            let items = cart::load_local(storage);
            if items.is_empty() {
                println!("Cart is empty");
            }
            for item in &items {
                println!(
                    "  #{} x{} {} {:.2} {}",
                    item.menu_item_id,
                    item.quantity,
                    item.name,
                    item.price,
                    session.currency()
                );
            }
        }
        Some("add") => {
            let (id, qty) = match args {
                [_, id, qty, ..] => (id, qty),
                _ => bail!("Usage: /cart add <menuItemId> <qty> [name] [price]"),
            };
            let id: i64 = id.parse().map_err(|_| anyhow!("Invalid menu item id: {}", id))?;
            let qty: i64 = qty.parse().map_err(|_| anyhow!("Invalid quantity: {}", qty))?;
            if qty < 1 {
                bail!("Quantity must be at least 1");
            }
            let name = args.get(3).map(String::as_str).unwrap_or("");
            let price: f64 = match args.get(4) {
                Some(p) => p.parse().map_err(|_| anyhow!("Invalid price: {}", p))?,
                None => 0.0,
            };

            let mut items = cart::load_local(storage);
            match items.iter_mut().find(|i| i.menu_item_id == id) {
                Some(existing) => {
                    existing.quantity = existing
                        .quantity
                        .checked_add(qty)
                        .ok_or_else(|| anyhow!("Quantity too large for item {}", id))?;
                }
                None => items.push(CartItem::new(id, qty, name, price)),
            }
            cart::store_local(storage, &items)?;
            println!("Cart: {} line(s)", items.len());
        }
        Some("clear") => {
            cart::store_local(storage, &[])?;
            println!("Cart cleared");
        }
        Some(other) => bail!("Unknown cart command: {}", other),
    }
    Ok(())
}
