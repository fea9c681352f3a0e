//! lingo - command-line front end for localization projects
//!
//! Opens the profile's local project store and the shared store under the
//! resolved root folder and runs one command against them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lingo_common::completeness::{leaf_status, LeafStatus};
use lingo_common::config::{default_config_path, RootFolderInitializer, RootFolderResolver, TomlConfig};
use lingo_common::keypath::{self, KeyNode};
use lingo_common::translate::{suggest_translation, translator_from_config};
use lingo_common::{
    compute_stats, Document, DualStoreSync, EditingSession, Identity, MembershipProtocol, Project,
    ProjectRef, ProjectStore, Role, SharedStore, SqliteSharedStore,
};

/// Command-line arguments for lingo
#[derive(Parser, Debug)]
#[command(name = "lingo")]
#[command(about = "Edit and share JSON localization projects")]
#[command(version)]
struct Args {
    /// Root folder holding the project databases
    #[arg(short, long, global = true, env = "LINGO_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Config file (defaults to ~/.config/lingo/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Acting user id
    #[arg(short, long, global = true, default_value = "local", env = "LINGO_USER")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the key tree of a JSON file
    Keys { file: PathBuf },
    /// Create a local project from a master JSON file
    New {
        name: String,
        file: PathBuf,
        #[arg(long, default_value = "en")]
        master: String,
        /// Comma separated target languages
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,
    },
    /// List local and shared projects
    List,
    /// Show keys with their translation status
    Show { project: String },
    /// Set a value; the master language edits the master document
    Set {
        project: String,
        lang: String,
        path: String,
        value: String,
    },
    /// Add a target language
    AddLanguage { project: String, lang: String },
    /// Remove a target language and its translations
    RemoveLanguage { project: String, lang: String },
    /// Completeness statistics
    Stats { project: String },
    /// Create or update the caller's profile
    Profile {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Move a local project into shared storage
    Promote { project: String },
    /// Create an invite code for a shared project
    Invite {
        project: String,
        #[arg(long, default_value = "editor")]
        role: Role,
        #[arg(long)]
        max_uses: Option<u32>,
        /// Expiry in hours from now
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// List invite codes of a shared project
    Invites { project: String },
    /// Delete an invite code
    Revoke { code: String },
    /// Join a shared project with an invite code
    Join { code: String },
    /// List members of a shared project
    Members { project: String },
    /// Remove a member from a shared project
    RemoveMember { project: String, user: String },
    /// Ask the configured translation service for a suggestion
    Suggest {
        project: String,
        lang: String,
        path: String,
    },
}

struct App {
    sync: DualStoreSync,
    membership: MembershipProtocol,
    shared: Arc<dyn SharedStore>,
    config: TomlConfig,
    identity: Identity,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let config = match &config_path {
        Some(path) => TomlConfig::load(path)?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("lingo={0},lingo_common={0}", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting lingo v{}", env!("CARGO_PKG_VERSION"));

    // Needs no storage
    if let Command::Keys { file } = &args.command {
        return print_keys(file);
    }

    let root_folder = RootFolderResolver::new()
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;
    info!("Root folder: {}", initializer.root_folder().display());

    let local = ProjectStore::open(&initializer.local_database_path())
        .await?
        .with_lock_wait_ms(config.sync.lock_wait_ms);
    let shared: Arc<dyn SharedStore> = Arc::new(
        SqliteSharedStore::open(&initializer.shared_database_path(&config.sync))
            .await?
            .with_lock_wait_ms(config.sync.lock_wait_ms),
    );

    let mut identity = Identity::new(args.user.clone());
    if shared.has_profile(&identity.user_id).await? {
        identity = identity.with_profile(None, None);
    }

    let app = App {
        sync: DualStoreSync::new(local, shared.clone()).with_policy(config.sync.conflict_policy),
        membership: MembershipProtocol::new(shared.clone()),
        shared,
        config,
        identity,
    };

    if let Err(e) = app.run(args.command).await {
        if let Some(err) = e.downcast_ref::<lingo_common::Error>() {
            eprintln!("{}", err.to_payload());
        }
        return Err(e);
    }
    Ok(())
}

impl App {
    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Keys { file } => print_keys(&file)?,
            Command::New {
                name,
                file,
                master,
                targets,
            } => {
                let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
                let project = Project::new(name, &master, &targets, read_document(&file)?)?;
                let stored = self.sync.persist(&self.identity, &project, Role::Owner).await?;
                println!("{}", stored.id);
            }
            Command::List => {
                for project in self.sync.list_projects(&self.identity).await? {
                    let location = if project.is_promoted() { "shared" } else { "local" };
                    println!(
                        "{}\t{}\t{}\t{} -> {}",
                        project.id,
                        location,
                        project.name,
                        project.master_language,
                        project.target_languages.join(",")
                    );
                }
            }
            Command::Show { project } => {
                let session = self.open(&project).await?;
                let tree = session.project.key_tree()?;
                let project = &session.project;
                print_tree(&tree, 0, &|path| {
                    Some(leaf_status(path, &project.translations, &project.target_languages))
                });
            }
            Command::Set {
                project,
                lang,
                path,
                value,
            } => {
                let mut session = self.open(&project).await?;
                let value = parse_value(&value);
                if lang.eq_ignore_ascii_case(&session.project.master_language) {
                    session.project.set_master_value(&path, value);
                } else {
                    session.project.set_translation(&lang, &path, value)?;
                }
                self.save(&session).await?;
            }
            Command::AddLanguage { project, lang } => {
                let mut session = self.open(&project).await?;
                if session.project.add_target_language(&lang)? {
                    self.save(&session).await?;
                }
            }
            Command::RemoveLanguage { project, lang } => {
                let mut session = self.open(&project).await?;
                if session.project.remove_target_language(&lang)? {
                    self.save(&session).await?;
                }
            }
            Command::Stats { project } => {
                let session = self.open(&project).await?;
                let p = &session.project;
                let stats = compute_stats(&p.key_tree()?, &p.translations, &p.target_languages);
                println!("{}", serde_json::to_string_pretty(&stats)?);
                println!("progress: {}%", stats.progress());
            }
            Command::Profile { email, name } => {
                let identity = Identity::new(self.identity.user_id.clone()).with_profile(email, name);
                self.shared.upsert_profile(&identity).await?;
                println!("profile saved for {}", identity.user_id);
            }
            Command::Promote { project } => {
                let local = self
                    .sync
                    .local()
                    .load(&project)
                    .await?
                    .with_context(|| format!("no local project {}", project))?;
                let promoted = self.sync.promote(&self.identity, &local).await?;
                println!("{}", promoted.id);
            }
            Command::Invite {
                project,
                role,
                max_uses,
                expires_in,
            } => {
                let expires_at = expires_in.map(lingo_common::time::hours_from_now);
                let invite = self
                    .membership
                    .create_invite(&self.identity, &project, role, max_uses, expires_at)
                    .await?;
                println!("{}", invite.code);
            }
            Command::Invites { project } => {
                let now = lingo_common::time::now();
                for invite in self.membership.list_invites(&self.identity, &project).await? {
                    let limit = invite
                        .max_uses
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}\t{}\t{}/{}\t{:?}",
                        invite.code,
                        invite.role,
                        invite.uses,
                        limit,
                        invite.status(now)
                    );
                }
            }
            Command::Revoke { code } => {
                self.membership.delete_invite(&self.identity, &code).await?;
            }
            Command::Join { code } => {
                let membership = self.membership.join(&self.identity, &code).await?;
                println!("{}\t{}", membership.project_id, membership.role);
            }
            Command::Members { project } => {
                for member in self.membership.list_members(&self.identity, &project).await? {
                    println!("{}\t{}\t{}", member.user_id, member.role, member.created_at);
                }
            }
            Command::RemoveMember { project, user } => {
                if !self
                    .membership
                    .remove_member(&self.identity, &project, &user)
                    .await?
                {
                    bail!("{} is not a member of {}", user, project);
                }
            }
            Command::Suggest {
                project,
                lang,
                path,
            } => {
                let session = self.open(&project).await?;
                let translator = translator_from_config(self.config.translator.as_ref());
                match suggest_translation(translator.as_deref(), &session.project, &lang, &path).await {
                    Some(text) => println!("{}", text),
                    None => bail!("no suggestion available for {}", path),
                }
            }
        }
        Ok(())
    }

    /// Local record if there is one, otherwise the shared project
    async fn open(&self, id: &str) -> Result<EditingSession> {
        let reference = match self.sync.local().load(id).await? {
            Some(_) => ProjectRef::Local(id.to_string()),
            None => ProjectRef::Shared(id.to_string()),
        };
        Ok(self.sync.load_for_editing(&self.identity, reference).await?)
    }

    async fn save(&self, session: &EditingSession) -> Result<()> {
        if !session.can_edit() {
            info!("Read-only access, changes are kept locally");
        }
        self.sync
            .persist(&self.identity, &session.project, session.role)
            .await?;
        Ok(())
    }
}

fn print_keys(path: &Path) -> Result<()> {
    let doc = read_document(path)?;
    print_tree(&keypath::build_tree(&keypath::flatten(&doc)?), 0, &|_| None);
    Ok(())
}

fn read_document(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Document::parse_object(&text)?)
}

/// JSON literal if it parses, plain string otherwise
fn parse_value(raw: &str) -> Document {
    Document::parse(raw).unwrap_or_else(|_| Document::from(raw))
}

fn print_tree(nodes: &[KeyNode], depth: usize, status: &dyn Fn(&str) -> Option<LeafStatus>) {
    for node in nodes {
        let indent = "  ".repeat(depth);
        if node.is_leaf {
            match status(&node.path) {
                Some(s) => println!("{}{} [{:?}]", indent, node.name, s),
                None => println!("{}{}", indent, node.name),
            }
        } else {
            println!("{}{}/", indent, node.name);
            print_tree(&node.children, depth + 1, status);
        }
    }
}
