use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use clap::{Args, Parser, Subcommand};
use nexus_session_core::memory::{
    MemoryDocumentStore, MemoryIdentityProvider, MemoryStorage, SharedMemoryOrigin,
};
use nexus_session_core::{
    AuthState, CoordinatorConfig, GuardView, Identity, PasswordRecovery, Role, SessionCoordinator,
    SharedStorage, TabContext,
};
use serde_json::{Value, json};

type Coordinator = SessionCoordinator<MemoryIdentityProvider, MemoryDocumentStore>;

#[derive(Parser)]
#[command(name = "nexus-session-sim")]
#[command(about = "Simulate browser tabs sharing one Nexus dashboard origin")]
struct Cli {
    /// Disable shared storage so tabs cannot hear each other.
    #[arg(long, global = true)]
    isolated: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign an admin in and ask for the super admin section.
    #[command(name = "role-redirect")]
    RoleRedirect(SignInArgs),
    /// Sign in an identity that has no profile document.
    #[command(name = "missing-profile")]
    MissingProfile(SignInArgs),
    /// Sign out in one tab and watch the others follow.
    #[command(name = "cross-tab-logout")]
    CrossTabLogout(TabsArgs),
    /// Open several tabs and report which one renders protected pages.
    #[command(name = "active-tab")]
    ActiveTab(TabsArgs),
    /// Walk the forgot-password, verify-code and reset-password pages.
    #[command(name = "password-reset")]
    PasswordReset(ResetArgs),
    /// Run every scenario with default arguments.
    All,
}

#[derive(Args, Clone)]
struct SignInArgs {
    #[arg(long, default_value = "42")]
    uid: String,
    #[arg(long, default_value = "admin")]
    role: String,
}

#[derive(Args, Clone)]
struct TabsArgs {
    #[arg(long, default_value_t = 2)]
    tabs: usize,
}

#[derive(Args, Clone)]
struct ResetArgs {
    #[arg(long, default_value = "ada@nexus.test")]
    email: String,
    #[arg(long, default_value = "a much better password")]
    new_password: String,
}

struct SimTab {
    provider: Rc<MemoryIdentityProvider>,
    coordinator: Coordinator,
}

struct Origin {
    shared: Option<SharedMemoryOrigin>,
    documents: Rc<MemoryDocumentStore>,
    config: CoordinatorConfig,
}

impl Origin {
    fn new(isolated: bool) -> Result<Self> {
        let config = CoordinatorConfig::from_env().context("load coordinator config")?;
        Ok(Self {
            shared: (!isolated).then(SharedMemoryOrigin::new),
            documents: Rc::new(MemoryDocumentStore::new()),
            config,
        })
    }

    fn seed_profile(&self, uid: &str, role: &str) {
        self.documents.insert(
            &self.config.profile_collection,
            uid,
            json!({ "role": role, "email": format!("{uid}@nexus.test") }),
        );
    }

    fn open_tab(&self) -> SimTab {
        let provider = Rc::new(MemoryIdentityProvider::new());
        let shared_storage = self.shared.as_ref().map(|origin| {
            Rc::new(origin.open_tab()) as Rc<dyn SharedStorage>
        });
        let mut coordinator = SessionCoordinator::new(
            Rc::clone(&provider),
            Rc::clone(&self.documents),
            TabContext {
                tab_storage: Rc::new(MemoryStorage::new()),
                shared_storage,
            },
            self.config.clone(),
        );
        coordinator.start();
        SimTab {
            provider,
            coordinator,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Commands::RoleRedirect(args) => run_role_redirect(cli.isolated, args).await?,
        Commands::MissingProfile(args) => run_missing_profile(cli.isolated, args).await?,
        Commands::CrossTabLogout(args) => run_cross_tab_logout(cli.isolated, args).await?,
        Commands::ActiveTab(args) => run_active_tab(cli.isolated, args).await?,
        Commands::PasswordReset(args) => run_password_reset(args).await?,
        Commands::All => {
            let sign_in = SignInArgs {
                uid: "42".to_string(),
                role: "admin".to_string(),
            };
            let tabs = TabsArgs { tabs: 2 };
            json!({
                "role_redirect": run_role_redirect(cli.isolated, sign_in.clone()).await?,
                "missing_profile": run_missing_profile(cli.isolated, sign_in).await?,
                "cross_tab_logout": run_cross_tab_logout(cli.isolated, tabs.clone()).await?,
                "active_tab": run_active_tab(cli.isolated, tabs).await?,
                "password_reset": run_password_reset(ResetArgs {
                    email: "ada@nexus.test".to_string(),
                    new_password: "a much better password".to_string(),
                })
                .await?,
            })
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_role_redirect(isolated: bool, args: SignInArgs) -> Result<Value> {
    let origin = Origin::new(isolated)?;
    origin.seed_profile(&args.uid, &args.role);
    let mut tab = origin.open_tab();

    tab.provider.emit(Some(Identity::new(args.uid.as_str())));
    tab.coordinator.process_pending().await;

    let principal = tab
        .coordinator
        .principal()
        .cloned()
        .ok_or_else(|| anyhow!("tab did not authenticate: {}", describe(tab.coordinator.state())))?;
    let views = [Role::SuperAdmin, Role::Admin]
        .into_iter()
        .map(|required| {
            (
                required.as_str().to_string(),
                Value::String(view_label(&tab.coordinator.guard(required))),
            )
        })
        .collect::<serde_json::Map<_, _>>();

    tracing::info!(uid = %principal.uid, role = %principal.role, "role redirect scenario done");
    Ok(json!({
        "tab_id": tab.coordinator.tab_id(),
        "uid": principal.uid,
        "role": principal.role.as_str(),
        "home": principal.role.home_route().to_path(),
        "guard": views,
    }))
}

async fn run_missing_profile(isolated: bool, args: SignInArgs) -> Result<Value> {
    let origin = Origin::new(isolated)?;
    let mut tab = origin.open_tab();

    tab.provider.emit(Some(Identity::new(args.uid.as_str())));
    tab.coordinator.process_pending().await;

    ensure!(
        tab.coordinator.state() == &AuthState::Unauthenticated,
        "expected forced sign-out, got {}",
        describe(tab.coordinator.state())
    );
    Ok(json!({
        "uid": args.uid,
        "state": tab.coordinator.state().as_str(),
        "provider_sign_outs": tab.provider.sign_out_calls(),
        "notice": tab.coordinator.notice().map(ToString::to_string),
    }))
}

async fn run_cross_tab_logout(isolated: bool, args: TabsArgs) -> Result<Value> {
    if args.tabs < 2 {
        bail!("--tabs must be at least 2");
    }
    let origin = Origin::new(isolated)?;
    let mut tabs = Vec::with_capacity(args.tabs);
    for index in 0..args.tabs {
        let uid = format!("user-{index}");
        origin.seed_profile(&uid, if index == 0 { "super_admin" } else { "admin" });
        let mut tab = origin.open_tab();
        tab.provider.emit(Some(Identity::new(uid)));
        tab.coordinator.process_pending().await;
        tabs.push(tab);
    }

    let (first, rest) = tabs
        .split_first_mut()
        .context("at least one tab is open")?;
    first
        .coordinator
        .sign_out()
        .await
        .map_err(|error| anyhow!("sign out failed: {error}"))?;

    let mut followers = Vec::new();
    for tab in rest.iter_mut() {
        tab.coordinator.process_pending().await;
        followers.push(json!({
            "tab_id": tab.coordinator.tab_id(),
            "state": tab.coordinator.state().as_str(),
            "session_cleared": tab.coordinator.session().is_none(),
        }));
    }

    Ok(json!({
        "signed_out_tab": first.coordinator.tab_id(),
        "cross_tab": !isolated,
        "followers": followers,
    }))
}

async fn run_active_tab(isolated: bool, args: TabsArgs) -> Result<Value> {
    if args.tabs == 0 {
        bail!("--tabs must be at least 1");
    }
    let origin = Origin::new(isolated)?;
    origin.seed_profile("42", "admin");
    let mut tabs = Vec::with_capacity(args.tabs);
    for _ in 0..args.tabs {
        let mut tab = origin.open_tab();
        tab.provider.emit(Some(Identity::new("42")));
        tab.coordinator.process_pending().await;
        tabs.push(tab);
    }

    let report = tabs
        .iter()
        .map(|tab| {
            json!({
                "tab_id": tab.coordinator.tab_id(),
                "activity": format!("{:?}", tab.coordinator.activity()),
                "dashboard": view_label(&tab.coordinator.guard(Role::Admin)),
            })
        })
        .collect::<Vec<_>>();
    Ok(Value::Array(report))
}

async fn run_password_reset(args: ResetArgs) -> Result<Value> {
    let provider = Rc::new(MemoryIdentityProvider::new());
    provider.register_account(&args.email, "forgotten password", "42");
    let recovery = PasswordRecovery::new(Rc::clone(&provider));

    let next = recovery
        .request_reset(&args.email)
        .await
        .map_err(|error| anyhow!("{error}"))?;
    let code = provider
        .last_reset_code()
        .context("provider did not issue a reset code")?;
    let (code, email) = recovery
        .verify_code(&code)
        .await
        .map_err(|error| anyhow!("{error}"))?;
    let done = recovery
        .confirm_reset(&code, &args.new_password, &args.new_password)
        .await
        .map_err(|error| anyhow!("{error}"))?;

    Ok(json!({
        "email": email,
        "after_request": next.to_path(),
        "after_confirm": done.to_path(),
        "password_changed": provider.password_of(&args.email).as_deref()
            == Some(args.new_password.as_str()),
    }))
}

fn view_label(view: &GuardView) -> String {
    match view {
        GuardView::Loading => "loading".to_string(),
        GuardView::Render => "render".to_string(),
        GuardView::Hidden => "hidden".to_string(),
        GuardView::Redirect(route) => format!("redirect:{}", route.to_path()),
        GuardView::Failed(error) => format!("failed:{error}"),
    }
}

fn describe(state: &AuthState) -> String {
    match state {
        AuthState::Error(error) => format!("error ({error})"),
        AuthState::Authenticating { uid } => format!("authenticating {uid}"),
        other => other.as_str().to_string(),
    }
}
