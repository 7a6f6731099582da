//! Terminal output macros.
//!
//! Every macro takes the message plus the `greppable` and `accessible` flags.
//! Greppable mode prints nothing; accessible mode drops the colored prefix.

/// Something went wrong but the sweep goes on.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!(
            "{} {}",
            ::colored::Colorize::bold(::colored::Colorize::red("[!]")),
            $name
        );
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!(
                    "{} {}",
                    ::colored::Colorize::bold(::colored::Colorize::red("[!]")),
                    $name
                );
            }
        }
    };
}

/// Informational detail about the run.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!(
            "{} {}",
            ::colored::Colorize::bold(::colored::Colorize::blue("[~]")),
            $name
        );
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!(
                    "{} {}",
                    ::colored::Colorize::bold(::colored::Colorize::blue("[~]")),
                    $name
                );
            }
        }
    };
}

/// A result worth the user's attention.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!(
            "{} {}",
            ::colored::Colorize::bold(::colored::Colorize::green("[>]")),
            $name
        );
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!(
                    "{} {}",
                    ::colored::Colorize::bold(::colored::Colorize::green("[>]")),
                    $name
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn macros_accept_both_forms() {
        warning!("warning");
        warning!("warning", true, false);
        warning!("warning", false, true);
        detail!("detail", false, false);
        output!(format!("output {}", 1), false, true);
    }
}
