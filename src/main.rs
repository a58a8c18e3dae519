use clap::Parser;
use trial_match::app::AppContext;
use trial_match::cli::{Cli, Commands, MatchArgs};
use trial_match::config::Config;
use trial_match::error::{Result, TrialMatchError};
use trial_match::export::{self, ExportDocument};
use trial_match::reviewer::ReviewCache;
use trial_match::session::{self, Session};
use trial_match::workflow::RunOutcome;
use trial_match::{data_sync, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config_path = cli.config.as_deref();
    let config = Config::load(config_path)?;

    match cli.command.unwrap_or(Commands::Session { patient: None }) {
        Commands::Session { patient } => {
            let context = AppContext::load(config).await?;
            let initial = match patient {
                Some(id) => Some(context.patients().get(&id)?.summary.clone()),
                None => None,
            };
            let classifier = context.classifier()?;
            if classifier.is_none() {
                println!("⚠ LLMのAPIキーが未設定のため、レビューなしで表示します");
            }
            let controller = context.controller(classifier);
            Session::new(&context, controller).run(initial).await?;
        }

        Commands::Match(args) => run_match(config, args).await?,

        Commands::Config {
            show,
            set_llm_key,
            set_similarity_token,
            provider,
            model,
            threshold,
            max,
        } => {
            let mut config = config;
            let mut changed = false;

            if let Some(key) = set_llm_key {
                config.set_llm_api_key(key, config_path)?;
                println!("✔ LLMのAPIキーを設定しました");
            }
            if let Some(token) = set_similarity_token {
                config.set_similarity_token(token, config_path)?;
                println!("✔ 類似度APIのトークンを設定しました");
            }
            if let Some(provider) = provider {
                config.llm_provider = provider;
                changed = true;
            }
            if let Some(model) = model {
                config.llm_model = model;
                changed = true;
            }
            if let Some(threshold) = threshold {
                config.minimum_similarity = threshold;
                changed = true;
            }
            if let Some(max) = max {
                config.max_candidates = max;
                changed = true;
            }
            if changed {
                config.validate()?;
                let path = config.save(config_path)?;
                println!("✔ 設定を保存しました: {}", path.display());
            }

            if show {
                let set = |v: bool| if v { "設定済み" } else { "未設定" };
                println!("設定:");
                println!("  データ: {}", config.data_dir.display());
                println!("  LLM: {} ({})", config.llm_provider, config.llm_model);
                println!("  LLM URL: {}", config.llm_base_url());
                println!("  LLM APIキー: {}", set(config.llm_api_key.is_some()));
                println!(
                    "  類似度API: {}",
                    config.similarity_endpoint.as_deref().unwrap_or("未設定")
                );
                println!("  類似度APIトークン: {}", set(config.similarity_token.is_some()));
                println!("  類似度の閾値: {}", config.minimum_similarity);
                println!("  最大候補数: {}", config.max_candidates);
                println!("  レビューキャッシュ: {}", config.review_cache_path().display());
            }
        }

        Commands::Cache { clear, info } => {
            let cache_path = config.review_cache_path();

            if info || !clear {
                // デフォルトまたは--info: 情報表示
                if cache_path.exists() {
                    let cache = ReviewCache::load(&cache_path);
                    println!("キャッシュ情報:");
                    println!("  パス: {}", cache_path.display());
                    println!("  件数: {}", cache.len());
                    if let Ok(meta) = std::fs::metadata(&cache_path) {
                        println!("  サイズ: {} bytes", meta.len());
                    }
                } else {
                    println!("キャッシュファイルが存在しません: {}", cache_path.display());
                }
            }

            if clear {
                match ReviewCache::clear(&cache_path) {
                    Ok(true) => println!("✔ キャッシュを削除しました: {}", cache_path.display()),
                    Ok(false) => println!("キャッシュファイルが存在しません"),
                    Err(e) => println!("キャッシュ削除エラー: {}", e),
                }
            }
        }

        Commands::Sync { force } => {
            let report = data_sync::ensure_data_files(&config, force).await?;
            for path in &report.downloaded {
                println!("✔ 取得: {}", path.display());
            }
            for path in &report.present {
                println!("- 取得済み: {}", path.display());
            }
        }
    }

    Ok(())
}

async fn run_match(mut config: Config, args: MatchArgs) -> Result<()> {
    if let Some(threshold) = args.threshold {
        config.minimum_similarity = threshold;
    }
    if let Some(max) = args.max {
        config.max_candidates = max;
    }
    config.validate()?;

    let context = AppContext::load(config).await?;
    let description = match (&args.summary, &args.summary_file, &args.patient) {
        (Some(summary), _, _) => summary.clone(),
        (_, Some(path), _) => std::fs::read_to_string(path)?,
        (_, _, Some(id)) => context.patients().get(id)?.summary.clone(),
        _ => return Err(TrialMatchError::Config("患者記述を指定してください".into())),
    };
    let description = description.trim().to_string();
    if description.is_empty() {
        return Err(TrialMatchError::Config("患者記述が空です".into()));
    }

    let classifier = if args.no_review { None } else { context.classifier()? };
    let controller = context.controller(classifier);

    let notices = controller.subscribe();
    let task = {
        let controller = controller.clone();
        let description = description.clone();
        tokio::spawn(async move { controller.submit(description).await })
    };
    let Some(outcome) = session::run_with_progress(&controller, notices, task).await? else {
        return Err(TrialMatchError::Cancelled);
    };
    if let RunOutcome::LookupFailed(message) = outcome {
        return Err(TrialMatchError::Lookup(message));
    }
    session::print_outcome(&outcome);

    let snapshot = controller.snapshot();
    let rows = snapshot.rows_with_flags();
    if rows.is_empty() {
        println!("類似度 {:.2} 以上の試験はありません", snapshot.threshold);
    } else {
        print!("{}", session::render_table(&rows));
    }

    if let Some(output) = args.output {
        let document = ExportDocument::new(&description, snapshot.threshold, &rows);
        for path in export::export_results(&document, args.format, &output, "trial-matches")? {
            println!("✔ 出力: {}", path.display());
        }
    }

    Ok(())
}
