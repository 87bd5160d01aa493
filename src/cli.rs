//! Interface de linha de comando do picsieve baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, count, untag)
//! e flags globais (--config, --verbose, --log-file).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Provider;

/// picsieve: triagem concorrente de imagens com classificador de visão.
#[derive(Debug, Parser)]
#[command(name = "picsieve", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./picsieve.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita logs detalhados (nível info).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Grava os logs neste arquivo em vez de stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Provedor aceito pela CLI, mapeado para [`Provider`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// API Messages da Anthropic.
    Anthropic,
    /// Endpoint compatível com OpenAI (Zhipu, OpenAI, proxies).
    #[value(alias = "zhipu")]
    Openai,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Anthropic => Provider::Anthropic,
            ProviderArg::Openai => Provider::OpenAi,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classifica todas as imagens pendentes e aplica os vereditos.
    Run {
        /// Diretório a varrer (padrão: diretório atual).
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Número máximo de classificações simultâneas.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Provedor de classificação.
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,

        /// Modelo de visão a usar.
        #[arg(long)]
        model: Option<String>,

        /// Timeout de cada chamada, em segundos.
        #[arg(long)]
        timeout: Option<u64>,

        /// Nome da pasta de quarentena, relativa à raiz.
        #[arg(long)]
        quarantine: Option<String>,

        /// Desliga a barra de progresso.
        #[arg(long, default_value_t = false)]
        no_progress: bool,

        /// Imprime o resumo final em JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Conta as imagens que ainda precisam de revisão, sem classificar.
    Count {
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// Remove marcadores de aprovação dos nomes de arquivo.
    Untag {
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Apenas lista o que seria renomeado.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}
